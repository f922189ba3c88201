use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::database::DatabaseManager;

/// GET / - service info
pub async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "ODS Admin API (Rust)",
            "version": version,
            "description": "Tenant-aware ODS admin service with education organization synchronization",
            "endpoints": {
                "home": "/",
                "health": "/health",
                "tenants": "/tenants[/:name]",
                "refresh": "POST /educationorganizations/refresh",
                "jobs": "/jobs/:job_id",
            }
        }
    }))
}

/// GET /health - admin database ping
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    let Some((engine, connection_string)) = state.admin_database.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "admin database not configured",
                "data": { "status": "degraded", "timestamp": now }
            })),
        );
    };

    match DatabaseManager::health_check(*engine, connection_string).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "engine": engine.as_str()
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}

use axum::extract::{Path, State};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::tenant_service::TenantSummary;

/// GET /tenants
pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<TenantSummary>> {
    let tenants = state.tenants.get_tenants(true).await?;
    Ok(ApiResponse::success(tenants))
}

/// GET /tenants/:name - case-insensitive lookup
pub async fn get(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<TenantSummary> {
    match state.tenants.get_tenant_by_id(&name).await? {
        Some(tenant) => Ok(ApiResponse::success(tenant)),
        None => Err(ApiError::not_found(format!("Tenant '{}' not found", name))),
    }
}

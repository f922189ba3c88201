use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::app::AppState;
use crate::error::ApiError;
use crate::jobs::refresh::ad_hoc_job_key;
use crate::jobs::{JobStatusRecord, TENANT_NAME_KEY};
use crate::middleware::{ApiResponse, ApiResult};

/// Header naming the tenant a request is for
pub const TENANT_HEADER: &str = "tenant";

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    /// Alternative to the `tenant` header
    pub tenant: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshAccepted {
    pub job_id: String,
    /// False when a refresh with the same job id was already queued or running
    pub scheduled: bool,
}

/// POST /educationorganizations/refresh - queue an ad hoc refresh
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RefreshQuery>,
) -> ApiResult<RefreshAccepted> {
    let tenant = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.tenant)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let mut job_data = HashMap::new();
    let tenant = if state.multi_tenancy {
        let name = tenant.ok_or_else(|| ApiError::bad_request("Tenant is required when multi-tenancy is enabled"))?;
        let known = state
            .tenants
            .get_tenant_by_id(&name)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Tenant '{}' not found", name)))?;
        job_data.insert(TENANT_NAME_KEY.to_string(), known.tenant_name.clone());
        Some(known.tenant_name)
    } else {
        None
    };

    let job_id = ad_hoc_job_key(tenant.as_deref());
    let scheduled = state
        .scheduler
        .schedule_job(Arc::clone(&state.refresh), &job_id, job_data, true, None)
        .await?;

    Ok(ApiResponse::accepted(RefreshAccepted { job_id, scheduled }))
}

/// GET /jobs/:job_id
pub async fn status(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<JobStatusRecord> {
    match state.statuses.get_status(&job_id).await? {
        Some(record) => Ok(ApiResponse::success(record)),
        None => Err(ApiError::not_found(format!("Job '{}' not found", job_id))),
    }
}

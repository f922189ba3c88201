use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::jobs::runner::{AdminJob, JobContext, JobType, JOB_TYPE_KEY, TENANT_NAME_KEY};
use crate::services::education_organization::EducationOrganizationService;

pub const REFRESH_JOB_NAME: &str = "RefreshEducationOrganizations";

/// Job key for an ad hoc refresh of one tenant (or the single default tenant)
pub fn ad_hoc_job_key(tenant_name: Option<&str>) -> String {
    match tenant_name {
        Some(tenant) if !tenant.is_empty() => format!("{}_{}", REFRESH_JOB_NAME, tenant.to_ascii_lowercase()),
        _ => format!("{}_default", REFRESH_JOB_NAME),
    }
}

/// Job key of the recurring all-tenants refresh
pub fn scheduled_job_key() -> String {
    format!("{}_Scheduled", REFRESH_JOB_NAME)
}

/// Which tenant a refresh run should cover, decided from the job data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    Tenant(String),
    AllTenants,
    Nothing,
}

pub fn refresh_scope(multi_tenancy: bool, ctx: &JobContext) -> RefreshScope {
    if multi_tenancy && ctx.data.contains_key(TENANT_NAME_KEY) {
        let tenant = ctx.get(TENANT_NAME_KEY).unwrap_or_default();
        let job_type = ctx.get(JOB_TYPE_KEY).unwrap_or_default();

        if !tenant.is_empty() {
            RefreshScope::Tenant(tenant.to_string())
        } else if job_type == JobType::Scheduled.as_str() {
            RefreshScope::AllTenants
        } else {
            RefreshScope::Nothing
        }
    } else {
        RefreshScope::AllTenants
    }
}

/// Mirrors education organizations from every in-scope ODS instance
pub struct RefreshEducationOrganizationsJob {
    service: Arc<EducationOrganizationService>,
    multi_tenancy: bool,
}

impl RefreshEducationOrganizationsJob {
    pub fn new(service: Arc<EducationOrganizationService>, multi_tenancy: bool) -> Self {
        Self { service, multi_tenancy }
    }
}

#[async_trait]
impl AdminJob for RefreshEducationOrganizationsJob {
    fn name(&self) -> &'static str {
        REFRESH_JOB_NAME
    }

    async fn execute_job(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let report = match refresh_scope(self.multi_tenancy, ctx) {
            RefreshScope::Tenant(tenant) => {
                info!(tenant = %tenant, job_id = %ctx.job_id, "Starting education organization refresh for tenant");
                self.service.execute(Some(&tenant), None).await?
            }
            RefreshScope::AllTenants => {
                info!(job_id = %ctx.job_id, "Starting education organization refresh");
                self.service.execute(None, None).await?
            }
            RefreshScope::Nothing => return Ok(()),
        };

        info!(
            job_id = %ctx.job_id,
            synced = report.synced(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Education organization refresh finished"
        );
        Ok(())
    }
}

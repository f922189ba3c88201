use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::app::AppState;
use crate::cli::OutputFormat;
use crate::jobs::refresh::ad_hoc_job_key;
use crate::jobs::{AdminJob, JobContext, JobRunner, JobStatus, REFRESH_JOB_NAME};
use crate::services::education_organization::{EducationOrganizationService, InstanceResult, SyncReport};

/// Runs one sync and keeps its report for printing
struct ReportingRefresh {
    sync: Arc<EducationOrganizationService>,
    tenant: Option<String>,
    instance: Option<i32>,
    report: Mutex<Option<SyncReport>>,
}

#[async_trait]
impl AdminJob for ReportingRefresh {
    fn name(&self) -> &'static str {
        REFRESH_JOB_NAME
    }

    async fn execute_job(&self, _ctx: &JobContext) -> anyhow::Result<()> {
        let report = self.sync.execute(self.tenant.as_deref(), self.instance).await?;
        *self.report.lock().await = Some(report);
        Ok(())
    }
}

pub async fn handle(tenant: Option<String>, instance: Option<i32>, output_format: OutputFormat) -> anyhow::Result<()> {
    let state = AppState::from_config(crate::config::config()).await?;

    let job_id = ad_hoc_job_key(tenant.as_deref());
    let job = Arc::new(ReportingRefresh {
        sync: Arc::clone(&state.sync),
        tenant,
        instance,
        report: Mutex::new(None),
    });
    let runner = JobRunner::new(job.clone(), Arc::clone(&state.statuses));

    let status = runner.execute(&JobContext::new(job_id.as_str())).await;
    let report = job.report.lock().await.take().unwrap_or_default();

    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "success": status == JobStatus::Completed,
                    "job_id": job_id,
                    "status": status,
                    "synced": report.synced(),
                    "skipped": report.skipped(),
                    "failed": report.failed(),
                    "outcomes": report.outcomes,
                }))?
            );
        }
        OutputFormat::Text => {
            println!("{:<12} {:<10} {:<10} {}", "TENANT", "INSTANCE", "RESULT", "DETAIL");
            println!("{}", "-".repeat(60));
            for outcome in &report.outcomes {
                let (result, detail) = match &outcome.result {
                    InstanceResult::Synced {
                        inserted,
                        updated,
                        deleted,
                    } => (
                        "synced",
                        format!("{} inserted, {} updated, {} deleted", inserted, updated, deleted),
                    ),
                    InstanceResult::Skipped { reason } => ("skipped", format!("{:?}", reason)),
                    InstanceResult::Failed { error } => ("failed", error.clone()),
                };
                println!("{:<12} {:<10} {:<10} {}", outcome.tenant, outcome.instance_id, result, detail);
            }
            println!();
            println!("Job {}: {}", job_id, status);
        }
    }

    if status == JobStatus::Error {
        anyhow::bail!("job {} failed; run `odsadmin status {}` for the message", job_id, job_id);
    }
    Ok(())
}

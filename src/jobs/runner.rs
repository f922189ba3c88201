use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};

use crate::jobs::status::{JobStatus, JobStatusStore};

/// Job data key carrying the tenant an ad hoc run is scoped to
pub const TENANT_NAME_KEY: &str = "TenantName";

/// Job data key carrying the [`JobType`] tag
pub const JOB_TYPE_KEY: &str = "JobType";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    AdHoc,
    Scheduled,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::AdHoc => "AdHoc",
            JobType::Scheduled => "Scheduled",
        }
    }
}

/// What a scheduler hands to a job: its identity plus a free-form data map
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub job_id: String,
    pub data: HashMap<String, String>,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// The body of a job. The runner owns status bookkeeping, the job only does its work.
#[async_trait]
pub trait AdminJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute_job(&self, ctx: &JobContext) -> anyhow::Result<()>;
}

/// Wraps any [`AdminJob`] with InProgress → Completed | Error status tracking.
///
/// `execute` never returns the job's error; callers learn the outcome from the
/// status store (or from the returned terminal status).
pub struct JobRunner {
    job: Arc<dyn AdminJob>,
    statuses: Arc<dyn JobStatusStore>,
}

impl JobRunner {
    pub fn new(job: Arc<dyn AdminJob>, statuses: Arc<dyn JobStatusStore>) -> Self {
        Self { job, statuses }
    }

    pub fn job_name(&self) -> &'static str {
        self.job.name()
    }

    pub async fn execute(&self, ctx: &JobContext) -> JobStatus {
        let job_id = ctx.job_id.as_str();

        match self.run(ctx).await {
            Ok(()) => {
                info!(job_id, job = self.job.name(), "Job completed");
                JobStatus::Completed
            }
            Err(e) => {
                error!(job_id, job = self.job.name(), error = ?e, "Job {} failed.", job_id);
                let message = e.to_string();
                if let Err(store_err) = self
                    .statuses
                    .set_status(job_id, JobStatus::Error, Some(&message))
                    .await
                {
                    error!(job_id, error = %store_err, "Failed to record Error status");
                }
                JobStatus::Error
            }
        }
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
        self.statuses
            .set_status(&ctx.job_id, JobStatus::InProgress, None)
            .await?;
        AssertUnwindSafe(self.job.execute_job(ctx))
            .catch_unwind()
            .await
            .map_err(|panic| anyhow::anyhow!("job panicked: {}", panic_message(&*panic)))??;
        self.statuses
            .set_status(&ctx.job_id, JobStatus::Completed, None)
            .await?;
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

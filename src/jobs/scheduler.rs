use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::database::DatabaseError;
use crate::jobs::runner::{JobContext, JobRunner, JobType, JOB_TYPE_KEY};
use crate::jobs::status::{JobStatus, JobStatusStore};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Must specify start_immediately or interval.")]
    InvalidSchedule,

    #[error("Failed to record job status: {0}")]
    Status(#[from] DatabaseError),
}

/// Runs wrapped jobs on tokio tasks, at most one live task per job key.
pub struct JobScheduler {
    statuses: Arc<dyn JobStatusStore>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(statuses: Arc<dyn JobStatusStore>) -> Self {
        Self {
            statuses,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule `runner` under `job_key`.
    ///
    /// Returns `Ok(false)` without doing anything when a job with the same key is
    /// still scheduled or running. Ad hoc jobs run once and are recorded as Pending
    /// before they start; interval jobs start now and repeat until shutdown.
    pub async fn schedule_job(
        &self,
        runner: Arc<JobRunner>,
        job_key: &str,
        job_data: HashMap<String, String>,
        start_immediately: bool,
        interval: Option<Duration>,
    ) -> Result<bool, SchedulerError> {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());

        if tasks.contains_key(job_key) {
            debug!(job_id = job_key, "Job already scheduled or running, skipping");
            return Ok(false);
        }

        let mut ctx = JobContext {
            job_id: job_key.to_string(),
            data: job_data,
        };

        let handle = if start_immediately {
            ctx.data.insert(JOB_TYPE_KEY.to_string(), JobType::AdHoc.as_str().to_string());
            self.statuses.set_status(job_key, JobStatus::Pending, None).await?;

            tokio::spawn(async move {
                runner.execute(&ctx).await;
            })
        } else if let Some(every) = interval {
            ctx.data.insert(JOB_TYPE_KEY.to_string(), JobType::Scheduled.as_str().to_string());

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    runner.execute(&ctx).await;
                }
            })
        } else {
            return Err(SchedulerError::InvalidSchedule);
        };

        info!(job_id = job_key, ad_hoc = start_immediately, "Scheduled job");
        tasks.insert(job_key.to_string(), handle);
        Ok(true)
    }

    /// Whether a task for `job_key` is still scheduled or running
    pub async fn is_active(&self, job_key: &str) -> bool {
        let tasks = self.tasks.lock().await;
        tasks.get(job_key).map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Abort every scheduled and running job
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (job_key, handle) in tasks.drain() {
            handle.abort();
            debug!(job_id = %job_key, "Aborted job");
        }
    }
}

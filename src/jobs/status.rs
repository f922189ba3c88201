use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::{sqlserver, DatabaseEngine, DatabaseError, DatabaseManager};

/// Lifecycle of a job id; one row per id, overwritten on every run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::InProgress => "InProgress",
            JobStatus::Completed => "Completed",
            JobStatus::Error => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Pending" => Ok(JobStatus::Pending),
            "InProgress" => Ok(JobStatus::InProgress),
            "Completed" => Ok(JobStatus::Completed),
            "Error" => Ok(JobStatus::Error),
            other => Err(DatabaseError::QueryError(format!("unknown job status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub error_message: Option<String>,
}

/// Current status of named jobs. Writes are upserts keyed by job id.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Create or overwrite the row for `job_id`. The message is replaced, never appended.
    async fn set_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError>;

    async fn get_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>, DatabaseError>;
}

/// Job status table in the admin database
pub struct SqlJobStatusStore {
    engine: DatabaseEngine,
    connection_string: String,
}

impl SqlJobStatusStore {
    pub fn new(engine: DatabaseEngine, connection_string: impl Into<String>) -> Self {
        Self {
            engine,
            connection_string: connection_string.into(),
        }
    }
}

#[async_trait]
impl JobStatusStore for SqlJobStatusStore {
    async fn set_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        match self.engine {
            DatabaseEngine::PostgreSql => {
                let pool = DatabaseManager::pg_pool(&self.connection_string).await?;
                sqlx::query(
                    "INSERT INTO adminapi.jobstatuses (jobid, status, errormessage)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (jobid) DO UPDATE
                     SET status = EXCLUDED.status, errormessage = EXCLUDED.errormessage",
                )
                .bind(job_id)
                .bind(status.as_str())
                .bind(error_message)
                .execute(&pool)
                .await?;
            }
            DatabaseEngine::SqlServer => {
                let mut client = sqlserver::connect(&self.connection_string).await?;
                client
                    .execute(
                        "MERGE adminapi.JobStatuses WITH (HOLDLOCK) AS target
                         USING (SELECT @P1 AS JobId, @P2 AS Status, @P3 AS ErrorMessage) AS source
                         ON target.JobId = source.JobId
                         WHEN MATCHED THEN
                             UPDATE SET Status = source.Status, ErrorMessage = source.ErrorMessage
                         WHEN NOT MATCHED THEN
                             INSERT (JobId, Status, ErrorMessage)
                             VALUES (source.JobId, source.Status, source.ErrorMessage);",
                        &[&job_id, &status.as_str(), &error_message],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>, DatabaseError> {
        let row: Option<(String, String, Option<String>)> = match self.engine {
            DatabaseEngine::PostgreSql => {
                let pool = DatabaseManager::pg_pool(&self.connection_string).await?;
                sqlx::query_as(
                    "SELECT jobid, status, errormessage FROM adminapi.jobstatuses WHERE jobid = $1",
                )
                .bind(job_id)
                .fetch_optional(&pool)
                .await?
            }
            DatabaseEngine::SqlServer => {
                let mut client = sqlserver::connect(&self.connection_string).await?;
                let row = client
                    .query(
                        "SELECT JobId, Status, ErrorMessage FROM adminapi.JobStatuses WHERE JobId = @P1",
                        &[&job_id],
                    )
                    .await?
                    .into_row()
                    .await?;
                match row {
                    Some(row) => Some((
                        row.try_get::<&str, _>("JobId")?.unwrap_or_default().to_string(),
                        row.try_get::<&str, _>("Status")?.unwrap_or_default().to_string(),
                        row.try_get::<&str, _>("ErrorMessage")?.map(str::to_string),
                    )),
                    None => None,
                }
            }
        };

        row.map(|(job_id, status, error_message)| {
            Ok(JobStatusRecord {
                job_id,
                status: status.parse()?,
                error_message,
            })
        })
        .transpose()
    }
}

// Background jobs: status tracking, the generic runner wrapper, scheduling,
// and the education organization refresh job itself.

pub mod refresh;
pub mod runner;
pub mod scheduler;
pub mod status;

pub use refresh::{RefreshEducationOrganizationsJob, REFRESH_JOB_NAME};
pub use runner::{AdminJob, JobContext, JobRunner, JobType, JOB_TYPE_KEY, TENANT_NAME_KEY};
pub use scheduler::{JobScheduler, SchedulerError};
pub use status::{JobStatus, JobStatusRecord, JobStatusStore, SqlJobStatusStore};

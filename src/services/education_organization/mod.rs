//! Education organization synchronization
//!
//! Mirrors the education organizations of every registered ODS instance into
//! `adminapi.educationorganizations`. A run resolves the tenants in scope, lists
//! their instances and processes each instance on its own task with its own
//! source connection and admin context. Instance failures end up in the
//! [`SyncReport`]; only configuration and listing problems fail the run.

pub mod context;
pub mod fetcher;
pub mod processor;
pub mod reconciler;

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::crypto::SymmetricStringEncryptionProvider;
use crate::database::{DatabaseEngine, DatabaseError, UnsupportedEngine};
use crate::services::tenancy::TenancyRouter;
use crate::services::tenant_service::TenantError;

pub use context::{AdminContextFactory, EducationOrganizationContext, SqlAdminContextFactory};
pub use fetcher::{EducationOrganizationSnapshot, OdsSnapshotFetcher, SnapshotFetcher, SourceEducationOrganization};
pub use processor::{InstanceOutcome, InstanceProcessor, InstanceResult, SkipReason};
pub use reconciler::{reconcile, ReconcilePlan};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("EncryptionKey can't be null.")]
    MissingEncryptionKey,

    #[error("DatabaseEngine can't be null.")]
    MissingDatabaseEngine,

    #[error(transparent)]
    UnsupportedEngine(#[from] UnsupportedEngine),

    #[error("Admin connection string can't be null.")]
    MissingAdminConnection,

    #[error(transparent)]
    Tenants(#[from] TenantError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Settings a sync run reads, taken from [`AppConfig`] at startup
#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    pub encryption_key: Option<String>,
    pub database_engine: Option<String>,
    pub max_concurrent_instances: Option<usize>,
    pub protect_partial_snapshots: bool,
}

impl SyncSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            encryption_key: config.app.encryption_key.clone(),
            database_engine: config.app.database_engine.clone(),
            max_concurrent_instances: config.jobs.max_concurrent_instances,
            protect_partial_snapshots: config.jobs.protect_partial_snapshots,
        }
    }
}

/// Per-instance outcomes of one run, in no particular order
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub outcomes: Vec<InstanceOutcome>,
}

impl SyncReport {
    pub fn synced(&self) -> usize {
        self.count(|r| matches!(r, InstanceResult::Synced { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, InstanceResult::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, InstanceResult::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&InstanceResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }
}

pub struct EducationOrganizationService {
    settings: SyncSettings,
    router: TenancyRouter,
    contexts: Arc<dyn AdminContextFactory>,
    processor: Arc<InstanceProcessor>,
}

impl EducationOrganizationService {
    pub fn new(
        settings: SyncSettings,
        router: TenancyRouter,
        fetcher: Arc<dyn SnapshotFetcher>,
        contexts: Arc<dyn AdminContextFactory>,
        decryptor: Arc<dyn SymmetricStringEncryptionProvider>,
    ) -> Self {
        let processor = InstanceProcessor::new(
            fetcher,
            Arc::clone(&contexts),
            decryptor,
            settings.protect_partial_snapshots,
        );
        Self {
            settings,
            router,
            contexts,
            processor: Arc::new(processor),
        }
    }

    pub async fn execute(&self, tenant_name: Option<&str>, instance_id: Option<i32>) -> Result<SyncReport, SyncError> {
        self.execute_with_cancellation(tenant_name, instance_id, CancellationToken::new())
            .await
    }

    /// Run a sync. Cancelling `cancel` ends every unfinished instance as failed.
    pub async fn execute_with_cancellation(
        &self,
        tenant_name: Option<&str>,
        instance_id: Option<i32>,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let (key, engine) = self.preconditions()?;

        let mut work = Vec::new();
        for scope in self.router.resolve_scope(tenant_name).await? {
            let instances = self.contexts.ods_instances(&scope, engine, instance_id).await?;
            for instance in instances
                .into_iter()
                .filter(|i| instance_id.map_or(true, |id| i.ods_instance_id == id))
            {
                work.push((scope.clone(), instance));
            }
        }

        info!(
            tenant = tenant_name.unwrap_or("*"),
            instances = work.len(),
            engine = %engine,
            "Synchronizing education organizations"
        );

        let key: Arc<str> = key.into();
        let limit = self.settings.max_concurrent_instances.map(|n| Arc::new(Semaphore::new(n)));
        let mut handles = Vec::with_capacity(work.len());

        for (scope, instance) in work {
            let processor = Arc::clone(&self.processor);
            let key = Arc::clone(&key);
            let limit = limit.clone();
            let cancel = cancel.clone();
            let tenant = scope.tenant_identifier.clone();
            let id = instance.ods_instance_id;

            let handle = tokio::spawn(async move {
                let run = async {
                    let _permit = match limit {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    processor.process_instance(&scope, &instance, &key, engine).await
                };

                tokio::select! {
                    outcome = run => outcome,
                    _ = cancel.cancelled() => InstanceOutcome::failed(scope.tenant_identifier.clone(), id, "cancelled"),
                }
            });
            handles.push((tenant, id, handle));
        }

        let mut report = SyncReport::default();
        for (tenant, id, handle) in handles {
            match handle.await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    error!(instance_id = id, tenant = %tenant, error = %e, "Instance task ended abnormally");
                    report.outcomes.push(InstanceOutcome::failed(tenant, id, e));
                }
            }
        }

        Ok(report)
    }

    /// The key is only checked for presence; each instance decodes it.
    fn preconditions(&self) -> Result<(String, DatabaseEngine), SyncError> {
        let key = self
            .settings
            .encryption_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(SyncError::MissingEncryptionKey)?
            .to_string();

        let engine = self
            .settings
            .database_engine
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or(SyncError::MissingDatabaseEngine)?
            .parse::<DatabaseEngine>()?;

        Ok((key, engine))
    }
}

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::crypto::{decode_key, SymmetricStringEncryptionProvider};
use crate::database::models::OdsInstance;
use crate::database::{DatabaseEngine, DatabaseError};
use crate::services::education_organization::context::AdminContextFactory;
use crate::services::education_organization::fetcher::SnapshotFetcher;
use crate::services::education_organization::reconciler::reconcile;
use crate::services::tenancy::TenantScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    DecryptionFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum InstanceResult {
    Synced { inserted: usize, updated: usize, deleted: usize },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

/// What happened to one instance during a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOutcome {
    pub tenant: String,
    pub instance_id: i32,
    #[serde(flatten)]
    pub result: InstanceResult,
}

impl InstanceOutcome {
    pub fn failed(tenant: impl Into<String>, instance_id: i32, error: impl fmt::Display) -> Self {
        Self {
            tenant: tenant.into(),
            instance_id,
            result: InstanceResult::Failed {
                error: error.to_string(),
            },
        }
    }
}

/// Fetch, reconcile and persist for a single ODS instance
pub struct InstanceProcessor {
    fetcher: Arc<dyn SnapshotFetcher>,
    contexts: Arc<dyn AdminContextFactory>,
    decryptor: Arc<dyn SymmetricStringEncryptionProvider>,
    protect_partial_snapshots: bool,
}

impl InstanceProcessor {
    pub fn new(
        fetcher: Arc<dyn SnapshotFetcher>,
        contexts: Arc<dyn AdminContextFactory>,
        decryptor: Arc<dyn SymmetricStringEncryptionProvider>,
        protect_partial_snapshots: bool,
    ) -> Self {
        Self {
            fetcher,
            contexts,
            decryptor,
            protect_partial_snapshots,
        }
    }

    /// Never returns an error. Every failure is logged and reported in the outcome.
    pub async fn process_instance(
        &self,
        scope: &TenantScope,
        instance: &OdsInstance,
        encryption_key: &str,
        engine: DatabaseEngine,
    ) -> InstanceOutcome {
        let instance_id = instance.ods_instance_id;
        let tenant = scope.tenant_identifier.as_str();

        let key = match decode_key(encryption_key) {
            Ok(key) => key,
            Err(e) => {
                error!(instance_id, tenant, error = %e, "Error processing ODS Instance ID {}: {}", instance_id, e);
                return InstanceOutcome::failed(tenant, instance_id, e);
            }
        };

        let Some(connection_string) = self.decryptor.try_decrypt(&instance.connection_string, &key) else {
            error!(
                instance_id,
                tenant,
                "Failed to decrypt connection string for ODS Instance ID {}. Skipping education organization synchronization for this instance.",
                instance_id
            );
            return InstanceOutcome {
                tenant: tenant.to_string(),
                instance_id,
                result: InstanceResult::Skipped {
                    reason: SkipReason::DecryptionFailed,
                },
            };
        };

        let result = match self.sync(scope, instance, &connection_string, engine).await {
            Ok(result) => result,
            Err(e) => {
                error!(instance_id, tenant, error = %e, "Error processing ODS Instance ID {}: {}", instance_id, e);
                InstanceResult::Failed { error: e.to_string() }
            }
        };

        InstanceOutcome {
            tenant: tenant.to_string(),
            instance_id,
            result,
        }
    }

    async fn sync(
        &self,
        scope: &TenantScope,
        instance: &OdsInstance,
        connection_string: &str,
        engine: DatabaseEngine,
    ) -> Result<InstanceResult, DatabaseError> {
        let instance_id = instance.ods_instance_id;
        let snapshot = self.fetcher.fetch(connection_string, engine).await;

        let mut context = self.contexts.create_context(scope, engine).await?;
        let existing = context.load_for_instance(instance_id).await?;
        let mut plan = reconcile(instance, &snapshot.records, existing, Utc::now());

        if !snapshot.complete && self.protect_partial_snapshots && !plan.to_delete.is_empty() {
            warn!(
                instance_id,
                skipped = plan.to_delete.len(),
                "Snapshot for ODS Instance ID {} is incomplete; keeping rows missing from it",
                instance_id
            );
            plan.to_delete.clear();
        }

        context.apply(&plan).await?;
        context.save_changes().await?;

        info!(
            instance_id,
            tenant = %scope.tenant_identifier,
            "Successfully processed ODS Instance ID {}. Updated/Added {} education organizations.",
            instance_id,
            plan.upserted_count()
        );

        Ok(InstanceResult::Synced {
            inserted: plan.to_insert.len(),
            updated: plan.to_update.len(),
            deleted: plan.to_delete.len(),
        })
    }
}

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::crypto::AesGcmEncryptionProvider;
use crate::database::{DatabaseEngine, DatabaseManager};
use crate::handlers;
use crate::jobs::refresh::scheduled_job_key;
use crate::jobs::{JobRunner, JobScheduler, JobStatusStore, RefreshEducationOrganizationsJob, SqlJobStatusStore};
use crate::services::education_organization::{
    EducationOrganizationService, OdsSnapshotFetcher, SqlAdminContextFactory, SyncSettings,
};
use crate::services::tenancy::TenancyRouter;
use crate::services::tenant_service::{SettingsTenantConfigurationProvider, TenantService, TenantsService};

/// Shared handles for handlers and the CLI
#[derive(Clone)]
pub struct AppState {
    pub multi_tenancy: bool,
    pub statuses: Arc<dyn JobStatusStore>,
    pub scheduler: Arc<JobScheduler>,
    pub refresh: Arc<JobRunner>,
    pub sync: Arc<EducationOrganizationService>,
    pub tenants: Arc<dyn TenantsService>,
    /// Admin database pinged by `/health`; `None` when not configured
    pub admin_database: Option<(DatabaseEngine, String)>,
}

impl AppState {
    /// Wire the production collaborators from configuration.
    ///
    /// Job status lives in the static admin database, so the engine and
    /// `EDFI_ADMIN_CONNECTION` are required here even in multi-tenant mode.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        DatabaseManager::configure(config.database.clone());

        let engine: DatabaseEngine = config
            .app
            .database_engine
            .as_deref()
            .context("DATABASE_ENGINE must be set")?
            .parse()?;
        let admin = config
            .connection_strings
            .edfi_admin
            .clone()
            .context("EDFI_ADMIN_CONNECTION must be set")?;

        let statuses: Arc<dyn JobStatusStore> = Arc::new(SqlJobStatusStore::new(engine, admin.clone()));

        let tenant_service = Arc::new(TenantService::from_config(config));
        if let Err(e) = tenant_service.initialize_tenants().await {
            warn!(error = %e, "Tenant cache not initialized");
        }
        let tenants: Arc<dyn TenantsService> = tenant_service;

        let router = TenancyRouter::new(
            config.app.multi_tenancy,
            Some(admin.clone()),
            config.connection_strings.edfi_security.clone(),
            Arc::clone(&tenants),
            Arc::new(SettingsTenantConfigurationProvider::from_config(config)),
        );

        let sync = Arc::new(EducationOrganizationService::new(
            SyncSettings::from_config(config),
            router,
            Arc::new(OdsSnapshotFetcher::new()),
            Arc::new(SqlAdminContextFactory::new()),
            Arc::new(AesGcmEncryptionProvider),
        ));

        let job = Arc::new(RefreshEducationOrganizationsJob::new(
            Arc::clone(&sync),
            config.app.multi_tenancy,
        ));

        Ok(Self {
            multi_tenancy: config.app.multi_tenancy,
            refresh: Arc::new(JobRunner::new(job, Arc::clone(&statuses))),
            scheduler: Arc::new(JobScheduler::new(Arc::clone(&statuses))),
            statuses,
            sync,
            tenants,
            admin_database: Some((engine, admin)),
        })
    }

    /// Start the recurring all-tenants refresh when an interval is configured
    pub async fn schedule_recurring_refresh(&self, interval_mins: Option<u64>) -> anyhow::Result<()> {
        let Some(mins) = interval_mins else {
            info!("No refresh interval configured; education organizations refresh on demand only");
            return Ok(());
        };

        self.scheduler
            .schedule_job(
                Arc::clone(&self.refresh),
                &scheduled_job_key(),
                HashMap::new(),
                false,
                Some(Duration::from_secs(mins * 60)),
            )
            .await?;
        info!(interval_mins = mins, "Scheduled recurring education organization refresh");
        Ok(())
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/", get(handlers::public::root))
        .route("/health", get(handlers::public::health))
        // Tenants
        .route("/tenants", get(handlers::tenants::list))
        .route("/tenants/:name", get(handlers::tenants::get))
        // Jobs
        .route("/educationorganizations/refresh", post(handlers::jobs::refresh))
        .route("/jobs/:job_id", get(handlers::jobs::status))
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

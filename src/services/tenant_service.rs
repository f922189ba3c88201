use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::{AppConfig, TenantSettings};
use crate::database::{DatabaseEngine, DatabaseManager};

/// Tenant name used when multi-tenancy is disabled
pub const DEFAULT_TENANT_NAME: &str = "default";

const ADMIN_DB_KEY: &str = "EdFi_Admin";
const SECURITY_DB_KEY: &str = "EdFi_Security";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub tenant_name: String,
    #[serde(skip_serializing)]
    pub admin_connection_string: String,
    #[serde(skip_serializing)]
    pub security_connection_string: String,
}

/// Connection settings for one tenant, as supplied by the configuration provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantConfiguration {
    pub tenant_identifier: String,
    pub admin_connection_string: String,
    pub security_connection_string: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Missing connection string {0}")]
    MissingConnectionString(&'static str),
}

/// Lists the tenants this deployment serves
#[async_trait]
pub trait TenantsService: Send + Sync {
    async fn get_tenants(&self, from_cache: bool) -> Result<Vec<TenantSummary>, TenantError>;

    async fn get_tenant_by_id(&self, tenant_name: &str) -> Result<Option<TenantSummary>, TenantError>;
}

/// Snapshot of per-tenant connection settings, keyed by tenant identifier
pub trait TenantConfigurationProvider: Send + Sync {
    fn get(&self) -> HashMap<String, TenantConfiguration>;
}

/// Tenant listing backed by the application settings, with an in-memory cache
pub struct TenantService {
    multi_tenancy: bool,
    database_engine: Option<DatabaseEngine>,
    tenants: HashMap<String, TenantSettings>,
    default_admin: Option<String>,
    default_security: Option<String>,
    cache: RwLock<Vec<TenantSummary>>,
}

impl TenantService {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            multi_tenancy: config.app.multi_tenancy,
            database_engine: config
                .app
                .database_engine
                .as_deref()
                .and_then(|engine| engine.parse().ok()),
            tenants: config.tenants.clone(),
            default_admin: config.connection_strings.edfi_admin.clone(),
            default_security: config.connection_strings.edfi_security.clone(),
            cache: RwLock::new(Vec::new()),
        }
    }

    /// Load the tenant list into the cache
    pub async fn initialize_tenants(&self) -> Result<(), TenantError> {
        let tenants = self.load_tenants()?;
        *self.cache.write().await = tenants;
        Ok(())
    }

    fn load_tenants(&self) -> Result<Vec<TenantSummary>, TenantError> {
        if !self.multi_tenancy {
            let admin = self
                .default_admin
                .clone()
                .ok_or(TenantError::MissingConnectionString(ADMIN_DB_KEY))?;
            let security = self
                .default_security
                .clone()
                .ok_or(TenantError::MissingConnectionString(SECURITY_DB_KEY))?;
            return Ok(vec![TenantSummary {
                tenant_name: DEFAULT_TENANT_NAME.to_string(),
                admin_connection_string: admin,
                security_connection_string: security,
            }]);
        }

        let mut results: Vec<TenantSummary> = self
            .tenants
            .iter()
            .map(|(name, settings)| {
                self.warn_if_invalid(name, ADMIN_DB_KEY, &settings.admin_connection_string);
                self.warn_if_invalid(name, SECURITY_DB_KEY, &settings.security_connection_string);
                TenantSummary {
                    tenant_name: name.clone(),
                    admin_connection_string: settings.admin_connection_string.clone(),
                    security_connection_string: settings.security_connection_string.clone(),
                }
            })
            .collect();
        results.sort_by(|a, b| a.tenant_name.cmp(&b.tenant_name));
        Ok(results)
    }

    fn warn_if_invalid(&self, tenant: &str, database: &str, connection_string: &str) {
        if let Some(engine) = self.database_engine {
            if !DatabaseManager::validate_connection_string(engine, connection_string) {
                warn!(
                    tenant,
                    database,
                    engine = %engine,
                    "Tenant has an invalid connection string"
                );
            }
        }
    }
}

#[async_trait]
impl TenantsService for TenantService {
    async fn get_tenants(&self, from_cache: bool) -> Result<Vec<TenantSummary>, TenantError> {
        if from_cache {
            let cached = self.cache.read().await;
            if !cached.is_empty() {
                return Ok(cached.clone());
            }
        }
        self.load_tenants()
    }

    async fn get_tenant_by_id(&self, tenant_name: &str) -> Result<Option<TenantSummary>, TenantError> {
        Ok(self
            .get_tenants(false)
            .await?
            .into_iter()
            .find(|t| t.tenant_name.eq_ignore_ascii_case(tenant_name)))
    }
}

/// Tenant configurations taken from the tenants file loaded into [`AppConfig`]
pub struct SettingsTenantConfigurationProvider {
    tenants: HashMap<String, TenantSettings>,
}

impl SettingsTenantConfigurationProvider {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tenants: config.tenants.clone(),
        }
    }
}

impl TenantConfigurationProvider for SettingsTenantConfigurationProvider {
    fn get(&self) -> HashMap<String, TenantConfiguration> {
        self.tenants
            .iter()
            .map(|(name, settings)| {
                (
                    name.clone(),
                    TenantConfiguration {
                        tenant_identifier: name.clone(),
                        admin_connection_string: settings.admin_connection_string.clone(),
                        security_connection_string: settings.security_connection_string.clone(),
                    },
                )
            })
            .collect()
    }
}

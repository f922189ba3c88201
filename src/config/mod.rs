use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub app: AppSettings,
    pub connection_strings: ConnectionStrings,
    pub database: DatabaseConfig,
    pub jobs: JobsConfig,
    pub tenants: HashMap<String, TenantSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// Values consumed by the education organization sync.
///
/// `database_engine` and `encryption_key` stay raw here; they are validated when a
/// sync run starts so a misconfigured deployment still boots and reports the error
/// through the job status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    pub database_engine: Option<String>,
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    pub multi_tenancy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStrings {
    #[serde(skip_serializing)]
    pub edfi_admin: Option<String>,
    #[serde(skip_serializing)]
    pub edfi_security: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub refresh_interval_mins: Option<u64>,
    pub max_concurrent_instances: Option<usize>,
    pub protect_partial_snapshots: bool,
}

/// One entry of the tenants file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSettings {
    #[serde(skip_serializing)]
    pub admin_connection_string: String,
    #[serde(skip_serializing)]
    pub security_connection_string: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read tenants file {path}: {source}")]
    TenantsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid tenants file {path}: {source}")]
    TenantsJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        let mut config = match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides();

        if let Ok(path) = env::var("TENANTS_FILE") {
            match load_tenants_file(&path) {
                Ok(tenants) => config.tenants = tenants,
                Err(e) => tracing::error!("{}", e),
            }
        }

        config
    }

    fn with_env_overrides(mut self) -> Self {
        // App settings
        if let Ok(v) = env::var("DATABASE_ENGINE") {
            self.app.database_engine = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("ENCRYPTION_KEY") {
            self.app.encryption_key = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("MULTI_TENANCY") {
            self.app.multi_tenancy = v.parse().unwrap_or(self.app.multi_tenancy);
        }

        // Static connection strings (single-tenant mode)
        if let Ok(v) = env::var("EDFI_ADMIN_CONNECTION") {
            self.connection_strings.edfi_admin = Some(v);
        }
        if let Ok(v) = env::var("EDFI_SECURITY_CONNECTION") {
            self.connection_strings.edfi_security = Some(v);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Job overrides
        if let Ok(v) = env::var("EDORG_REFRESH_INTERVAL_MINS") {
            self.jobs.refresh_interval_mins = v.parse().ok().filter(|mins| *mins > 0);
        }
        if let Ok(v) = env::var("EDORG_MAX_CONCURRENT_INSTANCES") {
            self.jobs.max_concurrent_instances = v.parse().ok().filter(|n| *n > 0);
        }
        if let Ok(v) = env::var("EDORG_PROTECT_PARTIAL_SNAPSHOTS") {
            self.jobs.protect_partial_snapshots = v.parse().unwrap_or(self.jobs.protect_partial_snapshots);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            app: AppSettings::default(),
            connection_strings: ConnectionStrings::default(),
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
            },
            jobs: JobsConfig {
                refresh_interval_mins: None,
                max_concurrent_instances: None,
                protect_partial_snapshots: false,
            },
            tenants: HashMap::new(),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            app: AppSettings::default(),
            connection_strings: ConnectionStrings::default(),
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
            },
            jobs: JobsConfig {
                refresh_interval_mins: Some(60),
                max_concurrent_instances: None,
                protect_partial_snapshots: false,
            },
            tenants: HashMap::new(),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            app: AppSettings::default(),
            connection_strings: ConnectionStrings::default(),
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
            },
            jobs: JobsConfig {
                refresh_interval_mins: Some(60),
                max_concurrent_instances: None,
                protect_partial_snapshots: false,
            },
            tenants: HashMap::new(),
        }
    }
}

/// Read the tenants JSON file: `{ "<tenant>": { "adminConnectionString": .., "securityConnectionString": .. } }`
pub fn load_tenants_file(path: impl AsRef<Path>) -> Result<HashMap<String, TenantSettings>, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::TenantsFile {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::TenantsJson {
        path: path.display().to_string(),
        source,
    })
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::collections::HashMap;
use std::sync::{Arc, RwLock as SyncRwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::database::engine::DatabaseEngine;
use crate::database::sqlserver;

/// Errors from DatabaseManager and the admin/ODS data access built on it
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    SqlServer(#[from] tiberius::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connection pool cache for PostgreSQL admin databases, keyed by connection string.
///
/// Tenants each bring their own admin connection string, so pools are created lazily
/// the first time a tenant is touched and reused afterwards. SQL Server connections
/// are not pooled; see [`sqlserver::connect`].
///
/// Pool sizing comes from [`DatabaseManager::configure`], called once at startup;
/// until then [`DatabaseConfig::default`] applies.
pub struct DatabaseManager {
    pools: Arc<RwLock<HashMap<String, PgPool>>>,
    pool_settings: SyncRwLock<DatabaseConfig>,
}

impl DatabaseManager {
    fn new() -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
            pool_settings: SyncRwLock::new(DatabaseConfig::default()),
        }
    }

    fn instance() -> &'static DatabaseManager {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<DatabaseManager> = OnceLock::new();
        INSTANCE.get_or_init(DatabaseManager::new)
    }

    /// Set the sizing used for pools created from now on
    pub fn configure(settings: DatabaseConfig) {
        Self::instance().set_pool_settings(settings);
    }

    fn set_pool_settings(&self, settings: DatabaseConfig) {
        if let Ok(mut current) = self.pool_settings.write() {
            *current = settings;
        }
    }

    fn pool_options(&self) -> PgPoolOptions {
        let settings = self
            .pool_settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
    }

    /// Get (or lazily create) the pool for a PostgreSQL connection string
    pub async fn pg_pool(connection_string: &str) -> Result<PgPool, DatabaseError> {
        Self::instance().get_pool(connection_string).await
    }

    async fn get_pool(&self, connection_string: &str) -> Result<PgPool, DatabaseError> {
        // Fast path: try read lock
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(connection_string) {
                return Ok(pool.clone());
            }
        }

        let options = pg_connect_options(connection_string)?;
        let pool = self.pool_options().connect_with(options).await?;

        let mut pools = self.pools.write().await;
        // Another task may have raced us here; keep whichever pool landed first.
        let pool = pools
            .entry(connection_string.to_string())
            .or_insert(pool)
            .clone();

        info!(pool_count = pools.len(), "Created admin database pool");
        Ok(pool)
    }

    /// Pings the given admin database
    pub async fn health_check(engine: DatabaseEngine, connection_string: &str) -> Result<(), DatabaseError> {
        match engine {
            DatabaseEngine::PostgreSql => {
                let pool = Self::pg_pool(connection_string).await?;
                sqlx::query("SELECT 1").execute(&pool).await?;
            }
            DatabaseEngine::SqlServer => {
                let mut client = sqlserver::connect(connection_string).await?;
                client.simple_query("SELECT 1").await?.into_results().await?;
            }
        }
        Ok(())
    }

    /// Close and remove all pools (e.g., on shutdown)
    pub async fn close_all() {
        let manager = Self::instance();
        let mut pools = manager.pools.write().await;
        for (_, pool) in pools.drain() {
            pool.close().await;
        }
        info!("Closed all admin database pools");
    }

    /// Check that a connection string is well formed for the engine, without connecting
    pub fn validate_connection_string(engine: DatabaseEngine, connection_string: &str) -> bool {
        if connection_string.trim().is_empty() {
            return false;
        }
        match engine {
            DatabaseEngine::PostgreSql => pg_connect_options(connection_string).is_ok(),
            DatabaseEngine::SqlServer => tiberius::Config::from_ado_string(connection_string).is_ok(),
        }
    }
}

/// Build PostgreSQL connect options from either a `postgres://` URL or an
/// ADO-style `Host=...;Port=...;Username=...` string.
pub fn pg_connect_options(connection_string: &str) -> Result<PgConnectOptions, DatabaseError> {
    let trimmed = connection_string.trim();
    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        let url = url::Url::parse(trimmed).map_err(|e| DatabaseError::InvalidConnectionString(e.to_string()))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(DatabaseError::InvalidConnectionString("missing host".to_string()));
        }
        return PgConnectOptions::from_url(&url).map_err(|e| DatabaseError::InvalidConnectionString(e.to_string()));
    }

    let mut options = PgConnectOptions::new();
    let mut saw_host = false;
    for pair in trimmed.split(';').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| DatabaseError::InvalidConnectionString(format!("malformed segment '{}'", pair.trim())))?;
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "host" | "server" => {
                options = options.host(value);
                saw_host = true;
            }
            "port" => {
                let port = value
                    .parse::<u16>()
                    .map_err(|_| DatabaseError::InvalidConnectionString(format!("invalid port '{}'", value)))?;
                options = options.port(port);
            }
            "username" | "user id" | "userid" | "user" | "uid" => options = options.username(value),
            "password" | "pwd" => options = options.password(value),
            "database" | "initial catalog" => options = options.database(value),
            "application name" => options = options.application_name(value),
            // Npgsql-only tuning keys (pooling, timeouts, ...) have no sqlx equivalent.
            _ => {}
        }
    }

    if !saw_host {
        return Err(DatabaseError::InvalidConnectionString("missing Host".to_string()));
    }
    Ok(options)
}

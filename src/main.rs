use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ods_admin_api::app::{app, AppState};
use ods_admin_api::database::DatabaseManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_ENGINE, EDFI_ADMIN_CONNECTION, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ods_admin_api::config::config();
    info!("Starting ODS Admin API in {:?} mode", config.environment);

    let state = AppState::from_config(config).await?;
    state.schedule_recurring_refresh(config.jobs.refresh_interval_mins).await?;
    let scheduler = state.scheduler.clone();

    // Allow tests or deployments to override port via env
    let port = std::env::var("ADMIN_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("ODS Admin API listening on http://{}", bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    scheduler.shutdown().await;
    DatabaseManager::close_all().await;
    Ok(())
}

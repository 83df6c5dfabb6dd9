use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::{info, warn};

mod app;
mod bootstrap;
mod config;
mod routes;
mod sessions;
mod socket;
mod telemetry;

use app::DemoApplication;
use config::{Cli, ServerConfig};
use routes::AppState;
use sessions::SessionRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = telemetry::Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        static_dir = %config.static_dir.display(),
        wire_format = ?config.sync.wire_format,
        "starting sandcastle server"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let sessions = SessionRegistry::new();
    let state = Arc::new(AppState {
        static_dir: config.static_dir.clone(),
        app_name: config.app_name.clone(),
        sync: config.sync.clone(),
        sessions: sessions.clone(),
        app: Arc::new(DemoApplication::new(
            config.app_name.clone(),
            config.tick_interval,
        )),
        metrics,
    });

    let router = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("sandcastle listening on {}", config.listen_addr);

    let graceful = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(sessions.clone()));
    graceful.await.context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        sessions = sessions.len(),
        "shutdown signal received; draining sessions"
    );
    if tokio::time::timeout(config.shutdown_grace, sessions.shutdown_all())
        .await
        .is_err()
    {
        warn!(
            remaining = sessions.len(),
            "sessions still open after grace period"
        );
    }
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal(sessions: SessionRegistry) {
    let _ = signal::ctrl_c().await;
    // Upgraded sockets keep the server alive until their sessions close.
    sessions.close_all();
}

mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use piston_common::config::Settings;
use piston_core::{DockerEngine, Executor};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub struct AppState {
    pub executor: Executor,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, finishing in-flight jobs...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Piston API booting...");

    let settings = Settings::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    let engine = DockerEngine::connect().context("Failed to create Docker client")?;
    match engine.ping().await {
        Ok(()) => {
            info!("Connected to Docker");
            // Containers left behind by a previous crash
            if let Err(e) = engine.reap_orphans().await {
                warn!(error = %e, "Failed to reap orphaned containers");
            }
        }
        Err(e) => warn!(error = %e, "Docker is not reachable; runs will fail until it is"),
    }

    let executor = Executor::from_settings(&settings, Arc::new(engine))
        .context("Failed to load runtime configuration")?;

    let state = Arc::new(AppState { executor });
    let app = routes::app(state, settings.max_body_bytes);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind_addr))?;

    info!("HTTP server listening on {}", settings.bind_addr);
    info!("Ready to accept jobs");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("API shutdown complete");
    Ok(())
}

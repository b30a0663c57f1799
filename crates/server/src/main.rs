// crates/server/src/main.rs
//! reelrun server binary.
//!
//! Parses configuration, sets up logging and metrics, then serves the job API
//! until Ctrl-C or SIGTERM. Running jobs are cancelled on the way out so no
//! pipeline process outlives the server.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use reelrun_observability::init_tracing;
use reelrun_server::keepalive::{health_url, spawn_keep_alive};
use reelrun_server::{create_app, init_metrics, AppState, ServerConfig, SharedSecret};
use reelrun_server_jobs::JobController;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    config.validate()?;

    // Keep the guard alive for the whole run so the file writer flushes on exit.
    let _log_guard = init_tracing(&config.log_config())?;
    init_metrics();

    for dir in [&config.videos_dir, &config.logs_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let controller = JobController::new(config.controller_config(), config.pipeline());
    let state = AppState::new(
        controller.clone(),
        Arc::new(SharedSecret::new(&config.api_secret)),
        config.origins(),
    );
    let app = create_app(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        version = env!("CARGO_PKG_VERSION"),
        interpreter = %config.interpreter,
        script = %config.pipeline_script.display(),
        videos_dir = %config.videos_dir.display(),
        "Server started"
    );

    let keep_alive = config.keep_alive_interval().map(|every| {
        let url = health_url(addr);
        tracing::info!(url = %url, interval_secs = every.as_secs(), "Keep-alive enabled");
        spawn_keep_alive(url, every)
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = keep_alive {
        handle.abort();
    }

    let running = controller.active_count();
    if running > 0 {
        tracing::info!(running, "Cancelling running jobs");
    }
    controller.shutdown().await;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}

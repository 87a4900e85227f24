//! FlowLLM API Gateway
//!
//! Entry point for chat turns and conversation management.
//! Handles:
//! - Authentication and rate limiting
//! - Streaming chat turns over Server-Sent Events
//! - Conversation and memory endpoints
//! - Observability (logging, metrics)

mod bootstrap;
mod handlers;
mod middleware;
mod routes;
mod state;

use flowllm_common::{config::AppConfig, metrics};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::IntoFuture;
use std::net::SocketAddr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config);

    info!(
        service = %config.observability.service_name,
        "Starting FlowLLM API Gateway v{}",
        flowllm_common::VERSION
    );

    // Metrics exporter on its own port, 0 disables it
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        match PrometheusBuilder::new().with_http_listener(metrics_addr).install() {
            Ok(()) => info!(addr = %metrics_addr, "Prometheus exporter listening"),
            Err(e) => warn!(error = %e, "Failed to install Prometheus exporter"),
        }
    }
    metrics::register_metrics();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let grace = config.shutdown_timeout();
    let state = bootstrap::build_state(config).await.map_err(|e| {
        error!(error = %e, "Failed to initialize application state");
        e
    })?;
    let turns = state.turns.clone();
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    // Open chat streams get `grace` to finish once shutdown starts
    let shutdown = CancellationToken::new();
    let signalled = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        signalled.cancel();
    });

    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => warn!("Shutdown grace period elapsed, dropping open connections"),
    }

    // Streams can end before their turn is stored
    turns.close();
    if tokio::time::timeout(grace, turns.wait()).await.is_err() {
        warn!(pending = turns.len(), "Turns still running after shutdown grace period");
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

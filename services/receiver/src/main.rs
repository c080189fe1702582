use anyhow::{Context, Result};
use receiver_service::config::{BackendKind, Config};
use receiver_service::{
    start_api_server, ActionDispatcher, AppState, LocalBackend, S3Backend, StorageBackend,
    SystemClock,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        backend = ?config.storage.backend,
        "Starting receiver service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let storage = init_storage(&config).await;
    let clock = SystemClock::new(config.time_zone()?);
    let dispatcher = ActionDispatcher::new();

    let api_state = AppState {
        storage,
        clock: Arc::new(clock),
        dispatcher: Arc::new(dispatcher),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Receiver service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down receiver service");
    api_handle.abort();
    info!("Receiver service stopped");

    Ok(())
}

/// Build the configured storage backend
async fn init_storage(config: &Config) -> Arc<dyn StorageBackend> {
    match config.storage.backend {
        BackendKind::Local => Arc::new(LocalBackend::from_config(&config.storage.local)),
        BackendKind::S3 => Arc::new(S3Backend::new(&config.storage.s3).await),
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use odm_gateway::cache::DiskCache;
use odm_gateway::handlers;
use odm_gateway::metrics::Metrics;
use odm_gateway::state::AppState;

/// Holds all configuration for the gateway process.
#[derive(Debug, Clone)]
struct Config {
    listen_addr: SocketAddr,
    metrics_listen_addr: SocketAddr,
    nodeodm_url: String,
    cache_dir: PathBuf,
    cache_ttl: Duration,
    default_max_points: usize,
}

impl Config {
    /// Parses configuration from environment variables.
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            listen_addr: std::env::var("GATEWAY_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3002".into())
                .parse()
                .context("Failed to parse GATEWAY_LISTEN_ADDR")?,
            metrics_listen_addr: std::env::var("GATEWAY_METRICS_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:9092".into())
                .parse()
                .context("Failed to parse GATEWAY_METRICS_LISTEN_ADDR")?,
            nodeodm_url: std::env::var("NODEODM_URL")
                .unwrap_or_else(|_| "http://localhost:3001".into()),
            cache_dir: std::env::var("GATEWAY_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            cache_ttl: Duration::from_secs(
                std::env::var("GATEWAY_CACHE_TTL_SECS")
                    .unwrap_or_else(|_| "3600".into())
                    .parse()
                    .context("Failed to parse GATEWAY_CACHE_TTL_SECS")?,
            ),
            default_max_points: std::env::var("GATEWAY_MAX_POINTS")
                .unwrap_or_else(|_| "2000000".into())
                .parse()
                .context("Failed to parse GATEWAY_MAX_POINTS")?,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    tracing::info!(config = ?config, "Loaded configuration");

    let metrics = Arc::new(Metrics::new());
    let cache = Arc::new(DiskCache::new(config.cache_dir.clone(), config.cache_ttl));
    let state = AppState::new(
        config.nodeodm_url.clone(),
        cache,
        metrics.clone(),
        config.default_max_points,
    );

    // Spawn the extraction API server
    let api_handle = {
        let router = handlers::router(state);
        let addr = config.listen_addr;
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .context("Failed to bind API listener")?;
            tracing::info!(addr = %addr, "Extraction API listening");
            axum::serve(listener, router.into_make_service()).await?;
            Ok::<(), anyhow::Error>(())
        })
    };

    // Spawn the metrics server
    let metrics_handle = {
        let router = metrics.router();
        let addr = config.metrics_listen_addr;
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .context("Failed to bind metrics listener")?;
            tracing::info!(addr = %addr, "Metrics server listening");
            axum::serve(listener, router.into_make_service()).await?;
            Ok::<(), anyhow::Error>(())
        })
    };

    tracing::info!("All services started. Awaiting shutdown signal...");
    shutdown_signal().await;
    tracing::info!("Shutdown signal received. Terminating services...");

    api_handle.abort();
    metrics_handle.abort();

    let (api_res, metrics_res) = tokio::join!(api_handle, metrics_handle);
    for res in [api_res, metrics_res] {
        match res {
            Ok(Err(e)) => tracing::error!(error = %e, "Server task failed."),
            Err(e) if !e.is_cancelled() => tracing::error!(error = %e, "Server task panicked."),
            _ => {}
        }
    }

    tracing::info!("Gateway shut down gracefully.");
    Ok(())
}

/// Listens for OS shutdown signals (SIGINT, SIGTERM) and resolves when one is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

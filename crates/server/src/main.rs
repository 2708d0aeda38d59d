//! stitch server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use stitch_core::config::AppConfig;
use stitch_server::{AppState, create_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// stitch - chunked file upload server
#[derive(Parser, Debug)]
#[command(name = "stitch-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STITCH_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Merge the optional config file with `STITCH_` environment overrides.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("STITCH_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("stitch v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    stitch_uploads::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = stitch_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let metadata = stitch_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let bind = config.server.bind.clone();
    let state = AppState::new(config, storage, metadata);
    tracing::info!(
        workers = state.files.merges().worker_count(),
        "Merge engine ready"
    );

    // Sessions left `merging` by a previous process never finished.
    state
        .files
        .tracker()
        .recover_interrupted_merges()
        .await
        .context("failed to requeue interrupted merges")?;

    let app = create_router(state.clone());

    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.files.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

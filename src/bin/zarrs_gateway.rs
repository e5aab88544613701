//! Serve the datasets of a catalog file over HTTP.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zarrs_gateway::{
    config::{CatalogFile, GatewayConfig},
    gateway::ChunkGateway,
    http::build_router,
};

/// Serve Zarr metadata and chunks of kerchunk reference manifests over HTTP.
///
/// Gateway options are read from `ZARRS_GATEWAY_*` environment variables.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The catalog file listing the served datasets.
    #[arg(long, env = "ZARRS_GATEWAY_CATALOG")]
    catalog: PathBuf,

    /// The address to listen on.
    #[arg(long, env = "ZARRS_GATEWAY_BIND", default_value = "127.0.0.1:9000")]
    bind: SocketAddr,

    /// Write logs as JSON.
    #[arg(long, env = "ZARRS_GATEWAY_JSON_LOGS")]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Reload the catalog on `SIGHUP`.
#[cfg(unix)]
fn spawn_catalog_reload(gateway: Arc<ChunkGateway>, path: PathBuf) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match CatalogFile::from_path(&path) {
                Ok(catalog) => {
                    gateway.load_catalog(&catalog);
                }
                Err(err) => tracing::warn!(
                    catalog = %path.display(),
                    error = %err,
                    "failed to reload catalog"
                ),
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn spawn_catalog_reload(_gateway: Arc<ChunkGateway>, _path: PathBuf) -> anyhow::Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    let catalog = CatalogFile::from_path(&cli.catalog)
        .with_context(|| format!("failed to load catalog {}", cli.catalog.display()))?;
    let gateway = Arc::new(ChunkGateway::new(config));
    gateway.load_catalog(&catalog);
    spawn_catalog_reload(gateway.clone(), cli.catalog.clone())?;

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    tracing::info!(address = %cli.bind, "listening");
    axum::serve(listener, build_router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

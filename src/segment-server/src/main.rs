//! Campaign Segments — contact segmentation service for email campaigns.
//!
//! Main entry point that wires the contact directory, the materialization
//! store and the segmentation engine, then starts the server.

use campaign_api::ApiServer;
use campaign_cache::{LocalMaterializationStore, MaterializationStore, RedisMaterializationStore};
use campaign_core::config::{AppConfig, MaterializationBackend};
use campaign_segmentation::{InMemoryDirectory, SegmentationEngine};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Local,
    Redis,
}

#[derive(Parser, Debug)]
#[command(name = "campaign-segments")]
#[command(about = "Contact segmentation service for email campaigns")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_SEGMENTS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_SEGMENTS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Materialization backend (overrides config)
    #[arg(long, value_enum)]
    materialization: Option<Backend>,

    /// Redis URL for the redis materialization backend (overrides config)
    #[arg(long, env = "CAMPAIGN_SEGMENTS__MATERIALIZATION__REDIS_URL")]
    redis_url: Option<String>,

    /// Contacts fetched per evaluation batch (overrides config)
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_segments=info,campaign_segmentation=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Segments starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(backend) = cli.materialization {
        config.materialization.backend = match backend {
            Backend::Local => MaterializationBackend::Local,
            Backend::Redis => MaterializationBackend::Redis,
        };
    }
    if let Some(url) = cli.redis_url {
        config.materialization.redis_url = url;
    }
    if let Some(batch_size) = cli.batch_size.filter(|size| *size > 0) {
        config.segmentation.batch_size = batch_size;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        batch_size = config.segmentation.batch_size,
        materialization = ?config.materialization.backend,
        "Configuration loaded"
    );

    let store: Arc<dyn MaterializationStore> = match config.materialization.backend {
        MaterializationBackend::Local => Arc::new(LocalMaterializationStore::new()),
        MaterializationBackend::Redis => Arc::new(
            RedisMaterializationStore::new(&config.materialization)
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to Redis");
                    e
                })?,
        ),
    };

    // Development directory; production deployments plug real contact and
    // membership stores in behind the same traits.
    let directory = Arc::new(InMemoryDirectory::with_demo_data());
    let engine = Arc::new(SegmentationEngine::new(
        directory.clone(),
        directory,
        store,
        &config.segmentation,
    ));

    let api_server = ApiServer::new(config.clone(), engine);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Campaign Segments is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}

//! lanpulsed entry point — config, logging, and the heartbeat driver.

use std::fs::File;
use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use lanpulse_core::LanpulseConfig;
use lanpulsed::node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    let config = LanpulseConfig::load().context("failed to load configuration")?;
    init_logging(&config)?;

    let id = config.identity.node_id.unwrap_or_else(Uuid::new_v4);
    tracing::info!(
        node = %id,
        port = config.network.listen_port,
        heartbeat_secs = config.network.heartbeat_interval_secs,
        "lanpulsed starting"
    );

    let mut node = Node::init(&config, id).await?;
    node.start();

    let mut heartbeat = tokio::time::interval(config.network.heartbeat());
    loop {
        tokio::select! {
            _ = heartbeat.tick() => node.update().await,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
        }
    }

    node.stop().await;
    Ok(())
}

fn init_logging(config: &LanpulseConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.log.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory for {}", path.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}

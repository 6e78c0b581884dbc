//! Warden Gateway - Main Entry Point

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_gateway::config::{GatewayConfig, DEFAULT_CONFIG_PATH};
use warden_gateway::Gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Warden Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("WARDEN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = GatewayConfig::load_or_default(&config_path);
    config.apply_env().context("invalid environment override")?;

    let gateway = Gateway::build(config).await.context("failed to assemble gateway")?;
    gateway.serve().await.context("gateway stopped with an error")?;

    Ok(())
}

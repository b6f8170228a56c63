//! One-shot repricing run: ingest sales, verify selected items against the
//! live market, decay public prices and publish the feed.

use anyhow::Context;
use bot_config::{config_path_from_env, BotConfig};
use market_price_bot::bin_common::init_tracing;
use repricer::RepricingRun;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = config_path_from_env();
    info!("Loading configuration from {}", config_path.display());

    let config = BotConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    RepricingRun::new(config).execute().await?;

    Ok(())
}

//! One full repricing run, wired together in a fixed order: ingest, select,
//! resolve, decay, persist, publish.

use crate::checkup::CheckupSelector;
use crate::resolver::MarketPriceResolver;
use crate::store::RecordStore;
use crate::{decay, publish, Result};
use bot_config::BotConfig;
use market_client::{ClientConfig, MarketClient};
use market_data::{CrowdPriceBook, ItemCatalog, SalesLedger};
use tracing::{info, warn};

pub struct RepricingRun {
    config: BotConfig,
}

impl RepricingRun {
    pub fn new(config: BotConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        // Every adjustment made this run schedules the next one here
        let window = now + self.config.repricing.reprice_window_hours * 60 * 60;

        let client = MarketClient::new(ClientConfig {
            base_url: self.config.market.base_url.clone(),
            user_agent: self.config.market.user_agent.clone(),
            login_path: self.config.market.login_path.clone(),
            status_path: self.config.market.status_path.clone(),
            backoffice_path: self.config.market.backoffice_path.clone(),
            search_path: self.config.market.search_path.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        })?;

        if !client.log_in().await? {
            warn!("Marketplace login is degraded; listings will be skipped this run");
        }

        // The read-only feeds need no session
        let http = reqwest::Client::new();

        let mut store = RecordStore::load(&self.config.paths.records_file)?;

        let mut ledger = SalesLedger::load(&self.config.paths.sales_history_file)?;
        let feed = ledger
            .fetch_new(
                &http,
                &self.config.feeds.sales_export_url,
                now,
                self.config.repricing.history_window_days,
            )
            .await?;

        let mut crowd = CrowdPriceBook::fetch(
            &http,
            &self.config.feeds.crowd_db_url,
            &self.config.feeds.crowd_db_version,
            &self.config.paths.crowd_dir,
            now.to_string(),
        )
        .await?;

        let catalog = ItemCatalog::fetch(
            &http,
            &self.config.feeds.catalog_url,
            &self.config.feeds.npc_stores_url,
            self.config.repricing.ignored_vendors.clone(),
        )
        .await?;

        let selector = CheckupSelector {
            catalog: &catalog,
            crowd: &crowd,
            cap: self.config.repricing.checkup_cap,
            now,
            window,
        };
        let selection = selector.select(&mut store, &feed);

        info!("Need to check {} items", selection.len());
        selection.log_reasons();

        let resolver = MarketPriceResolver {
            provider: &*client,
            catalog: &catalog,
            ledger: &ledger,
            overrides: &self.config.repricing.price_overrides,
            demand_window_days: self.config.repricing.demand_window_days,
        };
        resolver
            .verify_all(&mut store, &mut crowd, selection.order(), now)
            .await;

        decay::advance_all(&mut store, now, window);

        let quotes = publish::build_quotes(&store, &ledger, now);

        ledger.trim(self.config.repricing.history_window_days);
        ledger.save()?;
        store.save()?;

        crowd.write_submission_bundle(&self.config.paths.crowd_dir)?;

        let feed_text = publish::render_feed(&quotes, now);
        publish::write_feed(&self.config.paths.public_feed_file, &feed_text)?;

        if self.config.publish.git_push {
            match &self.config.publish.git_dir {
                Some(dir) => publish::git_push(dir).await,
                None => warn!("publish.git_push is set but publish.git_dir is not"),
            }
        }

        info!("Run complete: {} records tracked", store.len());
        Ok(())
    }
}

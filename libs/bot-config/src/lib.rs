//! Bot configuration: YAML file for everything shareable, `.env` for the
//! marketplace credentials.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarMissing(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub market: MarketConfig,
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub repricing: RepricingConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub publish: PublishConfig,

    /// Marketplace login from .env (not in YAML)
    #[serde(skip)]
    pub username: String,

    /// Marketplace password from .env (not in YAML)
    #[serde(skip)]
    pub password: String,
}

/// Endpoints of the authenticated marketplace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
    #[serde(default = "default_backoffice_path")]
    pub backoffice_path: String,
    #[serde(default = "default_search_path")]
    pub search_path: String,
}

/// Read-only upstream feeds (catalog, vendor list, sales export, crowd prices)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    pub catalog_url: String,
    pub npc_stores_url: String,
    pub sales_export_url: String,
    pub crowd_db_url: String,
    /// Snapshot version we know how to correct; anything else is "outdated"
    pub crowd_db_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepricingConfig {
    /// Most items the staleness passes may queue for verification per run
    #[serde(default = "default_checkup_cap")]
    pub checkup_cap: usize,
    /// The shared repricing window opens this long after the run starts
    #[serde(default = "default_window_hours")]
    pub reprice_window_hours: i64,
    /// Trailing window used for per-item demand estimates
    #[serde(default = "default_demand_window")]
    pub demand_window_days: i64,
    /// How much sale history to keep on disk
    #[serde(default = "default_history_window")]
    pub history_window_days: i64,
    /// Administratively pinned prices; these never hit the live market
    #[serde(default)]
    pub price_overrides: HashMap<u32, i64>,
    /// Vendors whose names contain any of these substrings are ignored
    #[serde(default)]
    pub ignored_vendors: Vec<String>,
}

impl Default for RepricingConfig {
    fn default() -> Self {
        Self {
            checkup_cap: default_checkup_cap(),
            reprice_window_hours: default_window_hours(),
            demand_window_days: default_demand_window(),
            history_window_days: default_history_window(),
            price_overrides: HashMap::new(),
            ignored_vendors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub records_file: PathBuf,
    pub sales_history_file: PathBuf,
    /// Crowd snapshot archive + correction bundles land here
    pub crowd_dir: PathBuf,
    pub public_feed_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PublishConfig {
    /// Commit and push the feed checkout after writing the file
    #[serde(default)]
    pub git_push: bool,
    #[serde(default)]
    pub git_dir: Option<PathBuf>,
}

fn default_user_agent() -> String {
    "market-price-bot".to_string()
}

fn default_login_path() -> String {
    "login.php".to_string()
}

fn default_status_path() -> String {
    "api.php".to_string()
}

fn default_backoffice_path() -> String {
    "backoffice.php".to_string()
}

fn default_search_path() -> String {
    "market.php".to_string()
}

fn default_checkup_cap() -> usize {
    1500
}

fn default_window_hours() -> i64 {
    10
}

fn default_demand_window() -> i64 {
    14
}

fn default_history_window() -> i64 {
    31
}

impl BotConfig {
    /// Load configuration from a YAML file, then credentials from `.env`
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut config: BotConfig = serde_yaml::from_str(&yaml_content)?;

        // Credentials live only in the environment
        dotenv::dotenv().ok();
        config.username = std::env::var("MARKET_USERNAME")
            .map_err(|_| ConfigError::EnvVarMissing("MARKET_USERNAME".to_string()))?;
        config.password = std::env::var("MARKET_PASSWORD")
            .map_err(|_| ConfigError::EnvVarMissing("MARKET_PASSWORD".to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Sanity-check the loaded values
    pub fn validate(&self) -> Result<()> {
        if self.market.base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "market.base_url must not be empty".to_string(),
            ));
        }

        for (name, url) in [
            ("feeds.catalog_url", &self.feeds.catalog_url),
            ("feeds.npc_stores_url", &self.feeds.npc_stores_url),
            ("feeds.sales_export_url", &self.feeds.sales_export_url),
            ("feeds.crowd_db_url", &self.feeds.crowd_db_url),
        ] {
            if url.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} must not be empty",
                    name
                )));
            }
        }

        if self.repricing.checkup_cap == 0 {
            return Err(ConfigError::ValidationError(
                "repricing.checkup_cap must be at least 1".to_string(),
            ));
        }

        if self.repricing.reprice_window_hours <= 0 {
            return Err(ConfigError::ValidationError(
                "repricing.reprice_window_hours must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Resolve the config path from `CONFIG_PATH`, falling back to `config.yaml`
pub fn config_path_from_env() -> PathBuf {
    std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.yaml"))
}

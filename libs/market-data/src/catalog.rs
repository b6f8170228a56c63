//! Static item catalog and NPC vendor price list.

use crate::Result;
use std::collections::HashMap;
use tracing::{debug, info};

/// One tradeable catalog entry.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub id: u32,
    pub name: String,
    /// Catalog-default sell price, the fallback floor for crowd sanity checks.
    pub autosell: i64,
}

/// One NPC storefront row.
#[derive(Debug, Clone)]
pub struct NpcStoreItem {
    pub store: String,
    pub store_id: String,
    pub item: String,
    pub price: i64,
    pub row: String,
}

/// Item id -> catalog entry, plus the NPC vendor price list.
pub struct ItemCatalog {
    items: HashMap<u32, CatalogItem>,
    stores: Vec<NpcStoreItem>,
    ignored_vendors: Vec<String>,
}

impl ItemCatalog {
    /// Download and parse both feeds.
    pub async fn fetch(
        http: &reqwest::Client,
        catalog_url: &str,
        npc_stores_url: &str,
        ignored_vendors: Vec<String>,
    ) -> Result<Self> {
        let catalog_text = http
            .get(catalog_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let stores_text = http
            .get(npc_stores_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let catalog = Self::from_text(&catalog_text, &stores_text, ignored_vendors);
        info!(
            "Loaded {} tradeable items and {} vendor rows",
            catalog.items.len(),
            catalog.stores.len()
        );
        Ok(catalog)
    }

    /// Parse the tab-separated feeds. Quest-flagged and non-tradeable items
    /// are dropped; malformed rows and comments are skipped silently.
    pub fn from_text(catalog_text: &str, stores_text: &str, ignored_vendors: Vec<String>) -> Self {
        let mut items = HashMap::new();

        for line in catalog_text.lines() {
            if line.trim().starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                continue;
            }

            let (Ok(id), Ok(autosell)) = (fields[0].parse::<u32>(), fields[6].parse::<i64>())
            else {
                continue;
            };

            let flags: Vec<&str> = fields[5].split(',').filter(|f| !f.is_empty()).collect();
            if flags.contains(&"q") || !flags.contains(&"t") {
                continue;
            }

            items.insert(
                id,
                CatalogItem {
                    id,
                    name: fields[1].to_string(),
                    autosell,
                },
            );
        }

        let mut stores = Vec::new();

        for line in stores_text.lines() {
            if line.trim().starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 5 {
                continue;
            }

            let Ok(price) = fields[3].parse::<i64>() else {
                continue;
            };

            stores.push(NpcStoreItem {
                store: fields[0].to_string(),
                store_id: fields[1].to_string(),
                item: fields[2].to_string(),
                price,
                row: fields[4].to_string(),
            });
        }

        Self {
            items,
            stores,
            ignored_vendors,
        }
    }

    pub fn get(&self, item_id: u32) -> Option<&CatalogItem> {
        self.items.get(&item_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Best NPC-vendor price for an item: 90% of the lowest price among
    /// non-ignored vendors, rounded up. `None` when no vendor stocks it.
    pub fn npc_price(&self, item_name: &str) -> Option<i64> {
        let lowest = self
            .stores
            .iter()
            .filter(|s| s.item == item_name && !self.is_ignored_store(&s.store))
            .map(|s| s.price)
            .min()?;

        debug!("NPC price for {:?}: {} before markdown", item_name, lowest);

        // ceil(lowest * 0.9)
        Some((lowest * 9 + 9) / 10)
    }

    fn is_ignored_store(&self, store: &str) -> bool {
        let store = store.to_lowercase();
        self.ignored_vendors
            .iter()
            .any(|needle| store.contains(needle.as_str()))
    }
}

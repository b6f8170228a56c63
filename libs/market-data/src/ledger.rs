//! Deduplicated sales ledger: persisted transaction history plus retrieval of
//! the aggregator's CSV export.

use crate::Result;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};
use types::SaleRecord;

const DAY_SECS: i64 = 24 * 60 * 60;

fn csv_row() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(\d+),(\d+),(\d+),([\d.]+),(\d+)$").expect("hardcoded regex")
    })
}

/// Transaction history for every item, deduplicated by transaction id.
pub struct SalesLedger {
    path: PathBuf,
    sales: Vec<SaleRecord>,
    known: HashSet<u64>,
}

impl SalesLedger {
    /// Load persisted history; a missing file is an empty ledger.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut sales: Vec<SaleRecord> = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };

        sales.sort_by_key(|s| s.transaction_id);
        let known = sales.iter().map(|s| s.transaction_id).collect();

        Ok(Self { path, sales, known })
    }

    /// Fetch the CSV export covering the window since our newest saved sale
    /// (at most `history_days`), merge it in and persist. Returns the fetched
    /// batch sorted by transaction id — the selector's transaction feed.
    pub async fn fetch_new(
        &mut self,
        http: &reqwest::Client,
        export_url: &str,
        now: i64,
        history_days: i64,
    ) -> Result<Vec<SaleRecord>> {
        let mut from = now - history_days * DAY_SECS;
        if let Some(newest) = self.sales.last() {
            if newest.timestamp > from {
                from = newest.timestamp;
            }
        }

        debug!("Fetching sales export from {} to {}", from, now);

        let csv = http
            .get(export_url)
            .query(&[
                ("start", from.to_string()),
                ("end", now.to_string()),
                ("itemid", String::new()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let mut batch = parse_csv(&csv);
        batch.sort_by_key(|s| s.transaction_id);

        let added = self.ingest(&batch);
        info!("Fetched {} sales, {} new", batch.len(), added);
        self.save()?;

        Ok(batch)
    }

    /// Merge a batch, skipping transactions we already hold. Returns how many
    /// were new.
    pub fn ingest(&mut self, batch: &[SaleRecord]) -> usize {
        let mut added = 0;

        for sale in batch {
            if !self.known.insert(sale.transaction_id) {
                continue;
            }
            self.sales.push(*sale);
            added += 1;
        }

        if added > 0 {
            self.sales.sort_by_key(|s| s.transaction_id);
        }

        added
    }

    /// Sales of one item inside the trailing window.
    pub fn sales_for(&self, item_id: u32, days: i64, now: i64) -> Vec<&SaleRecord> {
        let cutoff = now - days * DAY_SECS;
        self.sales
            .iter()
            .filter(|s| s.item_id == item_id && s.timestamp >= cutoff)
            .collect()
    }

    /// Units of one item sold inside the trailing window.
    pub fn volume_for(&self, item_id: u32, days: i64, now: i64) -> i64 {
        self.sales_for(item_id, days, now)
            .iter()
            .map(|s| s.volume)
            .sum()
    }

    /// Drop history older than `days` behind the newest sale.
    pub fn trim(&mut self, days: i64) {
        let Some(newest) = self.sales.last() else {
            return;
        };
        let cutoff = newest.timestamp - days * DAY_SECS;

        self.sales.retain(|s| s.timestamp >= cutoff);
        self.known = self.sales.iter().map(|s| s.transaction_id).collect();
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(&self.sales)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sales.is_empty()
    }
}

/// Parse the aggregator CSV: `transaction,item,volume,unit_cost,timestamp`.
/// The unit cost occasionally carries a decimal point and is rounded.
pub fn parse_csv(csv: &str) -> Vec<SaleRecord> {
    csv_row()
        .captures_iter(csv)
        .filter_map(|caps| {
            Some(SaleRecord {
                transaction_id: caps[1].parse().ok()?,
                item_id: caps[2].parse().ok()?,
                volume: caps[3].parse().ok()?,
                unit_cost: caps[4].parse::<f64>().ok()?.round() as i64,
                timestamp: caps[5].parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(id: u64, item: u32, ts: i64) -> SaleRecord {
        SaleRecord {
            transaction_id: id,
            item_id: item,
            volume: 1,
            unit_cost: 100,
            timestamp: ts,
        }
    }

    #[test]
    fn csv_rows_parse_and_round_unit_cost() {
        let csv = "header junk\n101,7,3,249.5,1000\n102,8,1,50,1001\nbad,row\n";
        let sales = parse_csv(csv);

        assert_eq!(sales.len(), 2);
        assert_eq!(sales[0].unit_cost, 250);
        assert_eq!(sales[1].item_id, 8);
    }

    #[test]
    fn ingest_deduplicates_by_transaction_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = SalesLedger::load(dir.path().join("sales.json")).unwrap();

        assert_eq!(ledger.ingest(&[sale(1, 7, 10), sale(2, 7, 11)]), 2);
        assert_eq!(ledger.ingest(&[sale(2, 7, 11), sale(3, 7, 12)]), 1);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn trailing_window_filters_by_item_and_age() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = SalesLedger::load(dir.path().join("sales.json")).unwrap();
        let now = 100 * DAY_SECS;

        ledger.ingest(&[
            sale(1, 7, now - 20 * DAY_SECS),
            sale(2, 7, now - 2 * DAY_SECS),
            sale(3, 8, now - DAY_SECS),
        ]);

        assert_eq!(ledger.sales_for(7, 7, now).len(), 1);
        assert_eq!(ledger.volume_for(7, 30, now), 2);
    }

    #[test]
    fn trim_drops_old_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = SalesLedger::load(dir.path().join("sales.json")).unwrap();

        ledger.ingest(&[sale(1, 7, 0), sale(2, 7, 40 * DAY_SECS)]);
        ledger.trim(31);

        assert_eq!(ledger.len(), 1);
        // The dropped transaction id may be ingested again
        assert_eq!(ledger.ingest(&[sale(1, 7, 39 * DAY_SECS)]), 1);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.json");

        let mut ledger = SalesLedger::load(&path).unwrap();
        ledger.ingest(&[sale(5, 7, 100)]);
        ledger.save().unwrap();

        let reloaded = SalesLedger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
    }
}

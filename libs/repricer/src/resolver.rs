//! The market price resolver: reconciles live listings, NPC vendor prices,
//! hardcoded overrides and demand history into one canonical real price per
//! item, and queues crowd-database corrections along the way.

use crate::store::RecordStore;
use crate::Result;
use async_trait::async_trait;
use market_client::MarketClient;
use market_data::{CrowdPriceBook, ItemCatalog, SalesLedger};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use types::{ItemRecord, Listing, ListingSource, EXTINCT, PRICE_CEILING};

/// Crowd prices below this are never worth validating.
const CROWD_FLOOR: i64 = 100;

/// Effective depth of an unlimited listing when walking for the fifth unit.
const UNLIMITED_DEPTH: i64 = 999;

/// The crowd methodology prices an item at its fifth-cheapest purchasable
/// unit.
const CROWD_SAMPLE_UNITS: i64 = 5;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(20);

/// Listing snapshots by item. One impl talks to the live marketplace; tests
/// substitute canned pages.
#[async_trait]
pub trait ListingsProvider: Sync {
    async fn aggregated_listings(&self, item_id: u32) -> market_client::Result<Vec<Listing>>;
    async fn live_search(&self, item_name: &str) -> market_client::Result<Vec<Listing>>;
}

#[async_trait]
impl ListingsProvider for MarketClient {
    async fn aggregated_listings(&self, item_id: u32) -> market_client::Result<Vec<Listing>> {
        MarketClient::aggregated_listings(self, item_id).await
    }

    async fn live_search(&self, item_name: &str) -> market_client::Result<Vec<Listing>> {
        MarketClient::live_search(self, item_name).await
    }
}

/// Walk price-sorted listings for the crowd's fifth-unit sample price.
///
/// Returns the sampled price and whether the walk can be trusted. The
/// aggregated snapshot truncates to its cheapest rows, so a price change
/// after three limited or four unlimited listings means cheaper rows may be
/// missing; a full search has no truncation and is always trusted.
pub fn sample_fifth_price(listings: &[Listing], source: ListingSource) -> (i64, bool) {
    let mut price = PRICE_CEILING;
    let mut limited_seen = 0;
    let mut unlimited_seen = 0;
    let mut units = 0;
    let mut trusted = true;

    for listing in listings {
        if price != listing.price && (limited_seen >= 3 || unlimited_seen >= 4) {
            trusted = false;
        }

        price = listing.price;
        if listing.limit > 0 {
            limited_seen += 1;
        } else {
            unlimited_seen += 1;
        }

        units += listing.quantity.min(if listing.limit > 0 {
            listing.limit
        } else {
            UNLIMITED_DEPTH
        });
        if units >= CROWD_SAMPLE_UNITS {
            break;
        }
    }

    match source {
        ListingSource::Aggregated => (price, trusted),
        ListingSource::LiveSearch => (price, true),
    }
}

pub struct MarketPriceResolver<'a, P> {
    pub provider: &'a P,
    pub catalog: &'a ItemCatalog,
    pub ledger: &'a SalesLedger,
    /// Items whose price is pinned by configuration; the market is not
    /// consulted and the crowd is never corrected for them.
    pub overrides: &'a HashMap<u32, i64>,
    pub demand_window_days: i64,
}

impl<P: ListingsProvider> MarketPriceResolver<'_, P> {
    /// Re-verify every selected item in selection order, skipping items that
    /// fail with a warning so one torn page never aborts the run.
    pub async fn verify_all(
        &self,
        store: &mut RecordStore,
        crowd: &mut CrowdPriceBook,
        order: &[u32],
        now: i64,
    ) {
        let mut last_printed = Instant::now();

        for (checked, &item_id) in order.iter().enumerate() {
            if last_printed.elapsed() > PROGRESS_INTERVAL {
                last_printed = Instant::now();
                info!("Checked {}/{}", checked, order.len());
            }

            let Some(rec) = store.get_mut(item_id) else {
                continue;
            };

            if let Err(err) = self.verify(rec, crowd, now).await {
                warn!("Skipping item {}: {}", item_id, err);
            }
        }

        info!("Finished checking {} items", order.len());
    }

    /// Resolve one item's real market price and update its record in place.
    pub async fn verify(
        &self,
        rec: &mut ItemRecord,
        crowd: &mut CrowdPriceBook,
        now: i64,
    ) -> Result<()> {
        let item_name = match &rec.item_name {
            Some(name) => Some(name.clone()),
            None => self.catalog.get(rec.item_id).map(|i| i.name.clone()),
        };

        let pinned = self.overrides.get(&rec.item_id).copied();

        let mut listings = if let Some(price) = pinned {
            vec![synthetic_listing(price)]
        } else if let Some(price) = item_name
            .as_deref()
            .and_then(|name| self.catalog.npc_price(name))
        {
            // An NPC vendor sells it; assume that supply is bottomless
            vec![synthetic_listing(price)]
        } else {
            self.provider.aggregated_listings(rec.item_id).await?
        };

        listings.sort_by_key(|l| l.price);
        rec.market_floor = listings.first().map(|l| l.price).unwrap_or(EXTINCT);

        if pinned.is_none() {
            self.validate_crowd_price(rec, crowd, &listings, item_name.as_deref(), now)
                .await;
        }

        let new_price = self.walk_real_price(rec.item_id, &listings, now);

        if new_price != rec.real_market_price {
            rec.last_price_change = now;
        }
        rec.real_market_price = new_price;
        rec.last_verified_at = now;
        rec.sales_budget_remaining = sales_budget(new_price, &listings);

        Ok(())
    }

    /// Demand-weighted walk: start at the cheapest listing and keep walking
    /// while recent demand could plausibly consume the stock, never past the
    /// average price buyers actually paid. No listings at all is [`EXTINCT`].
    fn walk_real_price(&self, item_id: u32, listings: &[Listing], now: i64) -> i64 {
        let sales = self.ledger.sales_for(item_id, self.demand_window_days, now);

        // None when there are no sales: an unknowable ceiling constrains
        // nothing
        let spent_ceiling = if sales.is_empty() {
            None
        } else {
            let total: i64 = sales.iter().map(|s| s.unit_cost).sum();
            Some(total / sales.len() as i64)
        };

        let volume: i64 = sales.iter().map(|s| s.volume).sum();
        let mut demand_left = volume / self.demand_window_days;

        let mut new_price = EXTINCT;

        for listing in listings {
            if new_price > 0 && spent_ceiling.is_some_and(|c| listing.price > c) {
                break;
            }

            new_price = listing.price;
            demand_left -= listing.quantity;

            if demand_left <= 0 {
                break;
            }
            if spent_ceiling.is_some_and(|c| c <= listing.price) {
                break;
            }
        }

        debug!(
            "Item {}: walked to {} (ceiling {:?}, window volume {})",
            item_id, new_price, spent_ceiling, volume
        );

        new_price
    }

    /// Compare the crowd database against our fifth-unit sample and queue a
    /// correction when they disagree. The cheap snapshot is escalated to a
    /// full search when its truncation makes the sample untrustworthy.
    async fn validate_crowd_price(
        &self,
        rec: &ItemRecord,
        crowd: &mut CrowdPriceBook,
        listings: &[Listing],
        item_name: Option<&str>,
        now: i64,
    ) {
        let Some(cp) = crowd.get(rec.item_id) else {
            return;
        };
        if cp.price < CROWD_FLOOR.max(rec.catalog_sell_price * 2) {
            return;
        }

        let (mut sample, trusted) = sample_fifth_price(listings, ListingSource::Aggregated);
        let mut supporting = listings;

        let searched;
        if !trusted {
            let Some(name) = item_name else {
                warn!("Cannot settle a sample price for unnamed item {}", rec.item_id);
                return;
            };

            match self.provider.live_search(name).await {
                Ok(mut found) => {
                    found.sort_by_key(|l| l.price);
                    searched = found;
                    supporting = &searched;
                    (sample, _) = sample_fifth_price(supporting, ListingSource::LiveSearch);
                }
                Err(err) => {
                    warn!("Search failed for {:?}: {}", name, err);
                    return;
                }
            }
        }

        if cp.price != sample {
            crowd.record_correction(rec.item_id, now, sample, supporting);
        }
    }
}

fn synthetic_listing(price: i64) -> Listing {
    Listing {
        price,
        quantity: PRICE_CEILING,
        limit: 0,
    }
}

/// How many more units may sell at roughly the current price before a
/// re-check is due. A single seller near the price point is concerning, so
/// the budget collapses to one.
fn sales_budget(new_price: i64, listings: &[Listing]) -> i64 {
    // "Roughly": within 125% of the resolved price
    let mut similar: Vec<&Listing> = listings
        .iter()
        .filter(|l| 5 * new_price >= 4 * l.price)
        .collect();

    if similar.len() < 2 {
        return 1;
    }

    similar.sort_by_key(|l| std::cmp::Reverse(l.quantity));
    let total: i64 = similar.iter().map(|l| l.quantity).sum();
    total - similar[0].quantity
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_client::ClientError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use types::SaleRecord;

    const NOW: i64 = 500 * 24 * 60 * 60;

    struct FakeMarket {
        aggregated: HashMap<u32, Vec<Listing>>,
        search: HashMap<String, Vec<Listing>>,
        failing: Vec<u32>,
        search_calls: AtomicUsize,
    }

    impl FakeMarket {
        fn new() -> Self {
            Self {
                aggregated: HashMap::new(),
                search: HashMap::new(),
                failing: Vec::new(),
                search_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ListingsProvider for FakeMarket {
        async fn aggregated_listings(
            &self,
            item_id: u32,
        ) -> market_client::Result<Vec<Listing>> {
            if self.failing.contains(&item_id) {
                return Err(ClientError::EmptyResponse(item_id));
            }
            Ok(self.aggregated.get(&item_id).cloned().unwrap_or_default())
        }

        async fn live_search(&self, item_name: &str) -> market_client::Result<Vec<Listing>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.search.get(item_name).cloned().unwrap_or_default())
        }
    }

    fn listing(price: i64, quantity: i64, limit: i64) -> Listing {
        Listing {
            price,
            quantity,
            limit,
        }
    }

    fn sale(id: u64, item: u32, volume: i64, unit_cost: i64) -> SaleRecord {
        SaleRecord {
            transaction_id: id,
            item_id: item,
            volume,
            unit_cost,
            timestamp: NOW - 100,
        }
    }

    fn ledger(sales: &[SaleRecord]) -> SalesLedger {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = SalesLedger::load(dir.path().join("sales.json")).unwrap();
        ledger.ingest(sales);
        ledger
    }

    fn record(item_id: u32, name: &str) -> ItemRecord {
        let mut rec = ItemRecord::from_sale(item_id, name.to_string(), 10, &sale(1, item_id, 1, 500));
        rec.real_market_price = 500;
        rec
    }

    fn empty_catalog() -> ItemCatalog {
        ItemCatalog::from_text("", "", Vec::new())
    }

    fn empty_crowd() -> CrowdPriceBook {
        CrowdPriceBook::from_text("1\n", "1", "t".into())
    }

    fn resolver<'a>(
        provider: &'a FakeMarket,
        catalog: &'a ItemCatalog,
        ledger: &'a SalesLedger,
        overrides: &'a HashMap<u32, i64>,
    ) -> MarketPriceResolver<'a, FakeMarket> {
        MarketPriceResolver {
            provider,
            catalog,
            ledger,
            overrides,
            demand_window_days: 14,
        }
    }

    #[test]
    fn fifth_price_walk_counts_limits() {
        // One unit at 100 (limit 1), then plenty at 150
        let listings = vec![listing(100, 2, 1), listing(150, 10, 0)];
        assert_eq!(
            sample_fifth_price(&listings, ListingSource::Aggregated),
            (150, true)
        );

        // No listings at all samples the ceiling
        assert_eq!(
            sample_fifth_price(&[], ListingSource::Aggregated),
            (PRICE_CEILING, true)
        );
    }

    #[test]
    fn truncated_snapshot_is_untrusted_but_a_search_never_is() {
        // Four shallow unlimited rows, then a price change before five units
        let listings = vec![
            listing(10, 1, 0),
            listing(10, 1, 0),
            listing(10, 1, 0),
            listing(10, 1, 0),
            listing(20, 50, 0),
        ];

        assert_eq!(
            sample_fifth_price(&listings, ListingSource::Aggregated),
            (20, false)
        );
        assert_eq!(
            sample_fifth_price(&listings, ListingSource::LiveSearch),
            (20, true)
        );
    }

    #[tokio::test]
    async fn walk_respects_demand_floor_and_spent_ceiling() {
        let mut market = FakeMarket::new();
        market.aggregated.insert(
            7,
            vec![listing(250, 30, 0), listing(100, 1, 0), listing(150, 1, 0)],
        );

        // 42 units over the window: demand floor 3. Buyers paid 200 on
        // average, which caps the walk below the 250 row.
        let ledger = ledger(&[sale(10, 7, 28, 300), sale(11, 7, 14, 100)]);
        let catalog = empty_catalog();
        let overrides = HashMap::new();
        let mut crowd = empty_crowd();
        let mut rec = record(7, "pail of oats");

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        assert_eq!(rec.real_market_price, 150);
        assert_eq!(rec.market_floor, 100);
        assert_eq!(rec.last_verified_at, NOW);
        assert_eq!(rec.last_price_change, NOW);
    }

    #[tokio::test]
    async fn no_recent_sales_resolves_to_the_cheapest_listing() {
        let mut market = FakeMarket::new();
        market
            .aggregated
            .insert(7, vec![listing(900, 5, 0), listing(700, 5, 0)]);

        let ledger = ledger(&[]);
        let catalog = empty_catalog();
        let overrides = HashMap::new();
        let mut crowd = empty_crowd();
        let mut rec = record(7, "pail of oats");

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        assert_eq!(rec.real_market_price, 700);
    }

    #[tokio::test]
    async fn empty_market_is_extinct() {
        let market = FakeMarket::new();
        let ledger = ledger(&[]);
        let catalog = empty_catalog();
        let overrides = HashMap::new();
        let mut crowd = empty_crowd();
        let mut rec = record(7, "pail of oats");

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        assert_eq!(rec.real_market_price, EXTINCT);
        assert_eq!(rec.market_floor, EXTINCT);
        assert_eq!(rec.sales_budget_remaining, 1);
    }

    #[tokio::test]
    async fn npc_vendor_price_beats_the_marketplace() {
        let mut market = FakeMarket::new();
        // Would resolve to 5 if the marketplace were consulted
        market.aggregated.insert(1, vec![listing(5, 999, 0)]);

        let catalog = ItemCatalog::from_text(
            "1\tseal club\t101\tclub.gif\tweapon\tt\t35",
            "General Store\tgeneral\tseal club\t111\tROW01",
            Vec::new(),
        );
        let ledger = ledger(&[]);
        let overrides = HashMap::new();
        let mut crowd = empty_crowd();
        let mut rec = record(1, "seal club");

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        // ceil(111 * 0.9)
        assert_eq!(rec.real_market_price, 100);
    }

    #[tokio::test]
    async fn pinned_price_skips_market_and_crowd() {
        let market = FakeMarket::new();
        let catalog = empty_catalog();
        let ledger = ledger(&[]);
        let overrides = HashMap::from([(25_u32, 10_i64)]);
        // Crowd disagrees wildly but pinned items are never corrected
        let mut crowd = CrowdPriceBook::from_text("1\n25\t100\t90000\n", "1", "t".into());
        let mut rec = record(25, "currency paste");
        rec.catalog_sell_price = 1;

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        assert_eq!(rec.real_market_price, 10);
        assert_eq!(crowd.correction_count(), 0);
    }

    #[tokio::test]
    async fn crowd_disagreement_queues_a_correction() {
        let mut market = FakeMarket::new();
        market
            .aggregated
            .insert(7, vec![listing(100, 2, 1), listing(150, 10, 0)]);

        let ledger = ledger(&[]);
        let catalog = empty_catalog();
        let overrides = HashMap::new();
        // Crowd says 1_500; our fifth-unit sample says 150
        let mut crowd = CrowdPriceBook::from_text("1\n7\t900\t1500\n", "1", "t".into());
        let mut rec = record(7, "pail of oats");
        rec.catalog_sell_price = 10;

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        assert_eq!(crowd.correction_count(), 1);
        assert!(crowd.corrected_snapshot().contains(&format!("7\t{NOW}\t150\n")));
        assert_eq!(market.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cheap_crowd_prices_are_left_alone() {
        let mut market = FakeMarket::new();
        market.aggregated.insert(7, vec![listing(150, 10, 0)]);

        let ledger = ledger(&[]);
        let catalog = empty_catalog();
        let overrides = HashMap::new();
        // 90 is below the 100 floor: not worth validating
        let mut crowd = CrowdPriceBook::from_text("1\n7\t900\t90\n", "1", "t".into());
        let mut rec = record(7, "pail of oats");
        rec.catalog_sell_price = 10;

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        assert_eq!(crowd.correction_count(), 0);
    }

    #[tokio::test]
    async fn untrusted_snapshot_escalates_to_a_search() {
        let mut market = FakeMarket::new();
        market.aggregated.insert(
            7,
            vec![
                listing(10, 1, 0),
                listing(10, 1, 0),
                listing(10, 1, 0),
                listing(10, 1, 0),
                listing(20, 50, 0),
            ],
        );
        market
            .search
            .insert("pail of oats".to_string(), vec![listing(15, 100, 0)]);

        let ledger = ledger(&[]);
        let catalog = empty_catalog();
        let overrides = HashMap::new();
        let mut crowd = CrowdPriceBook::from_text("1\n7\t900\t500\n", "1", "t".into());
        let mut rec = record(7, "pail of oats");
        rec.catalog_sell_price = 10;

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        assert_eq!(market.search_calls.load(Ordering::SeqCst), 1);
        assert!(crowd.corrected_snapshot().contains(&format!("7\t{NOW}\t15\n")));
    }

    #[tokio::test]
    async fn sales_budget_is_total_similar_minus_deepest() {
        let mut market = FakeMarket::new();
        // 100 and 120 are within 125% of the resolved 100; 200 is not
        market.aggregated.insert(
            7,
            vec![listing(100, 30, 0), listing(120, 10, 0), listing(200, 99, 0)],
        );

        let ledger = ledger(&[]);
        let catalog = empty_catalog();
        let overrides = HashMap::new();
        let mut crowd = empty_crowd();
        let mut rec = record(7, "pail of oats");

        resolver(&market, &catalog, &ledger, &overrides)
            .verify(&mut rec, &mut crowd, NOW)
            .await
            .unwrap();

        assert_eq!(rec.real_market_price, 100);
        assert_eq!(rec.sales_budget_remaining, 10);
    }

    #[tokio::test]
    async fn one_failing_item_does_not_abort_the_sweep() {
        let mut market = FakeMarket::new();
        market.failing.push(1);
        market.aggregated.insert(2, vec![listing(300, 10, 0)]);

        let ledger = ledger(&[]);
        let catalog = empty_catalog();
        let overrides = HashMap::new();
        let mut crowd = empty_crowd();
        let mut store = RecordStore::from_records(
            "unused.json",
            vec![record(1, "broken"), record(2, "fine")],
        );

        resolver(&market, &catalog, &ledger, &overrides)
            .verify_all(&mut store, &mut crowd, &[1, 2], NOW)
            .await;

        // The failing record keeps its old price; the good one resolves
        assert_eq!(store.get(1).unwrap().real_market_price, 500);
        assert_eq!(store.get(1).unwrap().last_verified_at, 0);
        assert_eq!(store.get(2).unwrap().real_market_price, 300);
    }
}

//! The checkup selector: decides, each run, which items are stale enough to
//! re-verify against the live market.
//!
//! Selection runs as a fixed sequence of passes. Once an item is selected it
//! is never re-evaluated by a later pass — the first reason wins — and only
//! the staleness passes are subject to the per-run cap. Given identical
//! records, transaction feed and crowd snapshot, the output set and order are
//! reproducible.

use crate::store::RecordStore;
use market_data::{CrowdPriceBook, ItemCatalog};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};
use types::{rounded_estimate, ItemRecord, SaleRecord, PRICE_CEILING};

pub const REASON_NEW_ITEM: &str = "new item";
pub const REASON_MAJOR_SALE: &str = "major sale difference";
pub const REASON_MAJOR_COST: &str = "major cost difference";
pub const REASON_PUBLIC_WRONG: &str = "public price was wrong";
pub const REASON_SALES_ZERO: &str = "sales hit zero";
pub const REASON_OUTDATED: &str = "outdated entry";
pub const REASON_REPRICING: &str = "is repricing";
pub const REASON_CROWD_CHEAPER: &str = "crowd says cheaper";
pub const REASON_FLAG_SET: &str = "flag set";

const DAY_SECS: i64 = 24 * 60 * 60;

/// A sale at under a tenth of the known real price always triggers a check.
const MAJOR_SALE_RATIO: i64 = 10;

/// Absolute sale-vs-real difference below this is never worth a check.
const MINOR_DIFF: i64 = 400;

/// Zero sales budget only matters once the record is this stale.
const SALES_ZERO_MIN_AGE: i64 = 2 * DAY_SECS;

const STALE_AGE: i64 = 30 * DAY_SECS;
const STALE_AGE_EXTINCT: i64 = 15 * DAY_SECS;

/// The ordered verification set plus a reason histogram for observability.
#[derive(Debug, Default)]
pub struct Selection {
    order: Vec<u32>,
    selected: HashSet<u32>,
    reasons: BTreeMap<&'static str, u32>,
}

impl Selection {
    /// Select an item for the given reason. Returns false if it was already
    /// selected — the earlier reason stands.
    fn push(&mut self, item_id: u32, reason: &'static str) -> bool {
        if !self.selected.insert(item_id) {
            return false;
        }
        self.order.push(item_id);
        *self.reasons.entry(reason).or_insert(0) += 1;
        true
    }

    pub fn contains(&self, item_id: u32) -> bool {
        self.selected.contains(&item_id)
    }

    /// Item ids in the order they were selected.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn reasons(&self) -> &BTreeMap<&'static str, u32> {
        &self.reasons
    }

    pub fn log_reasons(&self) {
        for (reason, count) in &self.reasons {
            info!("Reason: {}, {} times", reason, count);
        }
    }
}

pub struct CheckupSelector<'a> {
    pub catalog: &'a ItemCatalog,
    pub crowd: &'a CrowdPriceBook,
    /// Cap on the staleness passes, not on the urgent ones.
    pub cap: usize,
    pub now: i64,
    /// The shared repricing window; used to spot anomalous adjustment epochs.
    pub window: i64,
}

impl CheckupSelector<'_> {
    /// Run all passes over the record set and the new transaction feed.
    pub fn select(&self, store: &mut RecordStore, feed: &[SaleRecord]) -> Selection {
        let mut selection = Selection::default();

        self.enrich(store);
        self.replay_sales(store, feed, &mut selection);

        store.sort_by_staleness();

        self.public_price_sanity(store, &mut selection);
        self.staleness(store, &mut selection);
        self.pending_decay(store, &mut selection);
        self.crowd_disagreement(store, &mut selection);
        self.manual_flags(store, &mut selection);
        self.refresh_crowd_prices(store);

        // Honoring the flag clears it no matter which pass selected the item
        for &item_id in &selection.order {
            if let Some(rec) = store.get_mut(item_id) {
                rec.force_recheck = false;
            }
        }

        selection
    }

    /// Fill in names, catalog prices and first-time crowd prices.
    fn enrich(&self, store: &mut RecordStore) {
        for rec in store.iter_mut() {
            if rec.item_name.is_none() || rec.catalog_sell_price < 0 {
                match self.catalog.get(rec.item_id) {
                    Some(item) => {
                        if rec.item_name.is_none() {
                            rec.item_name = Some(item.name.clone());
                        }
                        if rec.catalog_sell_price < 0 {
                            rec.catalog_sell_price = item.autosell;
                        }
                    }
                    None => warn!("Unable to find item {} in the catalog", rec.item_id),
                }
            }

            if rec.crowd_price_as_of == 0 {
                if let Some(cp) = self.crowd.get(rec.item_id) {
                    rec.crowd_price = cp.price;
                    rec.crowd_price_as_of = cp.as_of;
                }
            }
        }
    }

    /// Discover new items and replay unseen transactions against their
    /// records. Replay is idempotent: the watermark makes a second pass over
    /// the same feed a no-op.
    fn replay_sales(&self, store: &mut RecordStore, feed: &[SaleRecord], selection: &mut Selection) {
        for sale in feed {
            if !store.contains(sale.item_id) {
                let Some(item) = self.catalog.get(sale.item_id) else {
                    warn!("Sale references unknown item {}", sale.item_id);
                    continue;
                };

                store.insert(ItemRecord::from_sale(
                    sale.item_id,
                    item.name.clone(),
                    item.autosell,
                    sale,
                ));
                selection.push(sale.item_id, REASON_NEW_ITEM);
                continue;
            }

            // contains() above guarantees the record exists
            let Some(rec) = store.get_mut(sale.item_id) else {
                continue;
            };

            if sale.transaction_id <= rec.last_transaction_id {
                continue;
            }

            rec.last_transaction_id = sale.transaction_id;
            rec.last_transaction_price = sale.unit_cost;
            rec.sales_budget_remaining -= sale.volume;

            // A sale at a fraction of the known price is urgent, cap or not
            let known = if rec.real_market_price < 0 {
                PRICE_CEILING
            } else {
                rec.real_market_price
            };
            if !selection.contains(sale.item_id) && sale.unit_cost * MAJOR_SALE_RATIO < known {
                selection.push(sale.item_id, REASON_MAJOR_SALE);
                continue;
            }

            if rec.next_adjustment_at > self.now {
                continue;
            }

            // Minor differences: same rounded bucket, or inside the absolute
            // threshold. The overlap between the two conditions is inherited
            // behavior; see DESIGN.md.
            if rounded_estimate(rec.real_market_price) == rounded_estimate(sale.unit_cost)
                || (rec.real_market_price - sale.unit_cost).abs() < MINOR_DIFF
            {
                continue;
            }

            selection.push(sale.item_id, REASON_MAJOR_COST);
        }
    }

    /// A public price of zero is an impossible state; redo those records.
    fn public_price_sanity(&self, store: &mut RecordStore, selection: &mut Selection) {
        for rec in store.iter_mut() {
            if rec.public_price == 0 && !selection.contains(rec.item_id) {
                selection.push(rec.item_id, REASON_PUBLIC_WRONG);
            }
        }
    }

    /// The capped staleness pass: exhausted sales budgets and long-unverified
    /// records, oldest first thanks to the staleness sort.
    fn staleness(&self, store: &mut RecordStore, selection: &mut Selection) {
        for rec in store.iter_mut() {
            // Stored public prices are always in rounded form
            rec.public_price = rounded_estimate(rec.public_price);

            if selection.contains(rec.item_id) || rec.next_adjustment_at > self.now {
                continue;
            }

            let age = self.now - rec.last_verified_at;

            if rec.sales_budget_remaining <= 0
                && age >= SALES_ZERO_MIN_AGE
                && selection.len() < self.cap
            {
                selection.push(rec.item_id, REASON_SALES_ZERO);
                continue;
            }

            let stale_age = if rec.is_extinct() {
                STALE_AGE_EXTINCT
            } else {
                STALE_AGE
            };
            if age > stale_age && selection.len() < self.cap {
                selection.push(rec.item_id, REASON_OUTDATED);
            }
        }
    }

    /// Items mid-convergence must be re-verified to keep converging. Runs
    /// after the capped pass and deliberately ignores the cap.
    fn pending_decay(&self, store: &mut RecordStore, selection: &mut Selection) {
        for rec in store.iter_mut() {
            if selection.contains(rec.item_id) {
                continue;
            }

            // A future adjustment epoch is respected only when it is sane;
            // anything beyond the shared window gets reset by the adjuster
            if rec.next_adjustment_at < self.window && rec.next_adjustment_at > self.now {
                continue;
            }

            if rec.decay_step > 0 {
                selection.push(rec.item_id, REASON_REPRICING);
            }
        }
    }

    /// The crowd database claims a fresher, different price that is high
    /// enough above the catalog floor to be actionable.
    fn crowd_disagreement(&self, store: &mut RecordStore, selection: &mut Selection) {
        for rec in store.iter_mut() {
            if selection.contains(rec.item_id) || rec.next_adjustment_at > self.now {
                continue;
            }

            let Some(cp) = self.crowd.get(rec.item_id) else {
                continue;
            };

            if cp.as_of < rec.last_verified_at
                || cp.price == rec.crowd_price
                || rec.catalog_sell_price * 2 >= cp.price
            {
                continue;
            }

            selection.push(rec.item_id, REASON_CROWD_CHEAPER);
        }
    }

    fn manual_flags(&self, store: &mut RecordStore, selection: &mut Selection) {
        for rec in store.iter_mut() {
            if selection.contains(rec.item_id) || !rec.force_recheck {
                continue;
            }
            selection.push(rec.item_id, REASON_FLAG_SET);
        }
    }

    /// Cheap and always current: mirror the crowd book into every record.
    fn refresh_crowd_prices(&self, store: &mut RecordStore) {
        for rec in store.iter_mut() {
            if let Some(cp) = self.crowd.get(rec.item_id) {
                rec.crowd_price = cp.price;
                rec.crowd_price_as_of = cp.as_of;
            }
        }
    }
}

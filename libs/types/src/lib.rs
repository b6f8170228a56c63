//! Shared domain types for the marketplace repricing engine.

use serde::{Deserialize, Serialize};

/// Ceiling sentinel: prices at or above `999_999_998` mean "no real market".
pub const PRICE_CEILING: i64 = 999_999_999;

/// An item with no live listings at all.
pub const EXTINCT: i64 = -1;

/// True when a price carries no market information (extinct or at the ceiling).
pub fn is_no_market(price: i64) -> bool {
    price < 0 || price >= PRICE_CEILING - 1
}

/// Round a price down to a deliberately coarse, round-looking figure.
///
/// Keeps the two leading decimal digits, rounds the kept prefix up when the
/// digit after it is greater than 6, zero-fills the rest and clamps to
/// [`PRICE_CEILING`]. Values at or below zero pass through unchanged, so the
/// sentinels survive rounding. Idempotent.
pub fn rounded_estimate(price: i64) -> i64 {
    rounded_estimate_digits(price, 2)
}

/// [`rounded_estimate`] with a configurable number of kept leading digits.
pub fn rounded_estimate_digits(price: i64, keep_digits: u32) -> i64 {
    if price <= 0 || keep_digits == 0 {
        return price;
    }

    let digits = decimal_digits(price);
    if digits <= keep_digits {
        return price;
    }

    let scale = 10_i64.pow(digits - keep_digits);
    let mut prefix = price / scale;

    // We encourage lower numbers: only a 7 or above bumps the prefix
    if (price / (scale / 10)) % 10 > 6 {
        prefix += 1;
    }

    (prefix * scale).min(PRICE_CEILING)
}

fn decimal_digits(mut n: i64) -> u32 {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Per-item pricing state, persisted across runs.
///
/// Every field other than `item_id` carries a serde default so records written
/// by older versions of the bot still load. `public_price` is only ever
/// written by the decay adjuster; everything else belongs to the checkup
/// selector and the market resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_id: u32,
    /// Resolved lazily from the item catalog; may stay `None` indefinitely.
    #[serde(default)]
    pub item_name: Option<String>,
    /// Catalog fallback floor; -1 until the catalog has been consulted.
    #[serde(default = "minus_one")]
    pub catalog_sell_price: i64,
    /// Last resolved canonical market price; [`EXTINCT`] when unavailable.
    #[serde(default)]
    pub real_market_price: i64,
    /// Last value pulled from the crowd price database.
    #[serde(default)]
    pub crowd_price: i64,
    #[serde(default)]
    pub crowd_price_as_of: i64,
    /// Unit cost of the most recently replayed sale.
    #[serde(default)]
    pub last_transaction_price: i64,
    /// Dedup watermark: sales with an id at or below this are ignored.
    #[serde(default)]
    pub last_transaction_id: u64,
    /// The displayed estimate; the only externally visible number.
    #[serde(default)]
    pub public_price: i64,
    /// Epoch of the last market resolution for this item.
    #[serde(default)]
    pub last_verified_at: i64,
    /// Epoch at which the resolved real price last moved.
    #[serde(default)]
    pub last_price_change: i64,
    /// The public price may not move again before this epoch.
    #[serde(default)]
    pub next_adjustment_at: i64,
    /// Counts down on each matching sale; at or below zero triggers a re-check.
    #[serde(default)]
    pub sales_budget_remaining: i64,
    /// Per-run convergence step; 0 once converged.
    #[serde(default)]
    pub decay_step: i64,
    /// Lowest listing price seen at the last verification (debug).
    #[serde(default = "minus_two")]
    pub market_floor: i64,
    /// Manual re-check flag. Absent in old files means "check it".
    #[serde(default = "yes")]
    pub force_recheck: bool,
}

fn minus_one() -> i64 {
    -1
}

fn minus_two() -> i64 {
    -2
}

fn yes() -> bool {
    true
}

impl ItemRecord {
    /// Seed a record for an item first seen through a sale.
    pub fn from_sale(item_id: u32, name: String, catalog_sell_price: i64, sale: &SaleRecord) -> Self {
        Self {
            item_id,
            item_name: Some(name),
            catalog_sell_price,
            real_market_price: sale.unit_cost,
            crowd_price: 0,
            crowd_price_as_of: 0,
            last_transaction_price: sale.unit_cost,
            last_transaction_id: sale.transaction_id,
            public_price: sale.unit_cost,
            last_verified_at: 0,
            last_price_change: sale.timestamp,
            next_adjustment_at: 0,
            sales_budget_remaining: 0,
            decay_step: 0,
            market_floor: 0,
            force_recheck: true,
        }
    }

    /// True when the item had no live listings at the last verification.
    pub fn is_extinct(&self) -> bool {
        self.real_market_price < 0
    }
}

/// One marketplace sale, immutable once ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub transaction_id: u64,
    pub item_id: u32,
    pub volume: i64,
    pub unit_cost: i64,
    pub timestamp: i64,
}

/// One live listing for an item: price per unit, units on offer and the
/// per-day purchase limit (0 = unlimited).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub price: i64,
    pub quantity: i64,
    pub limit: i64,
}

/// Where a listing snapshot came from. The cheap aggregated snapshot can
/// under-sample; a full live search is always trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingSource {
    Aggregated,
    LiveSearch,
}

/// One row of the published price feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicQuote {
    pub item_id: u32,
    /// `last_verified_at` as of publish time.
    pub age: i64,
    pub price: i64,
    /// Units sold in the trailing week.
    pub volume: i64,
}

//! Rate-limited convergence of public prices toward resolved real prices.

use crate::store::RecordStore;
use tracing::info;
use types::{is_no_market, rounded_estimate, ItemRecord};

/// Smallest convergence step, in currency units.
const MIN_STEP: i64 = 100;

/// Real prices at or below this are displayed exactly; rounding would erase
/// too much of the signal at the low end.
const ROUNDING_FLOOR: i64 = 100;

/// Advance one record's public price a single bounded step toward its target.
///
/// Pure state machine: `decay_step == 0` is converged, anything else is
/// converging. `window` is the shared repricing window computed once per run;
/// a `next_adjustment_at` beyond it is a stale epoch from a broken earlier
/// run and is treated as due now. Returns whether the public price moved.
///
/// Rises are capped at one step, falls at two — downward corrections are
/// trusted more than upward ones. Crossing an extinction boundary snaps
/// instead of decaying.
pub fn advance(rec: &mut ItemRecord, now: i64, window: i64) -> bool {
    // Not yet eligible, unless the scheduled epoch is anomalously far out
    if rec.next_adjustment_at < window && rec.next_adjustment_at > now {
        return false;
    }

    let mut target = rec.real_market_price;
    if target > ROUNDING_FLOOR {
        target = rounded_estimate(target);
    }

    if rec.public_price == target {
        rec.decay_step = 0;
        return false;
    }

    rec.next_adjustment_at = window;

    let before = rec.public_price;
    let mut new_price = rec.public_price;

    if is_no_market(new_price) || is_no_market(target) {
        // No gradual decay across extinction boundaries
        new_price = target;
    } else {
        let step = rec
            .decay_step
            .max((rec.public_price + 9) / 10) // ceil(10%)
            .max(MIN_STEP);
        rec.decay_step = step;

        if new_price < target {
            new_price = (new_price + step).min(target);
        } else {
            new_price = (new_price - step * 2).max(target);
        }
    }

    new_price = rounded_estimate(new_price);
    rec.public_price = new_price;

    if new_price == target {
        rec.decay_step = 0;
    }

    before != rec.public_price
}

/// Advance every record; returns how many public prices moved.
pub fn advance_all(store: &mut RecordStore, now: i64, window: i64) -> usize {
    let moved = store
        .iter_mut()
        .map(|rec| advance(rec, now, window))
        .filter(|&moved| moved)
        .count();

    info!("{} public prices moved this run", moved);
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{EXTINCT, PRICE_CEILING};

    const NOW: i64 = 1_000_000;
    const WINDOW: i64 = NOW + 10 * 60 * 60;

    fn rec(public: i64, real: i64, decay_step: i64) -> ItemRecord {
        let mut rec: ItemRecord = serde_json::from_str(r#"{"item_id": 1}"#).unwrap();
        rec.public_price = public;
        rec.real_market_price = real;
        rec.decay_step = decay_step;
        rec.next_adjustment_at = 0;
        rec
    }

    #[test]
    fn converged_record_is_a_noop() {
        let mut r = rec(500, 500, 3);
        assert!(!advance(&mut r, NOW, WINDOW));
        assert_eq!(r.public_price, 500);
        assert_eq!(r.decay_step, 0);
    }

    #[test]
    fn first_step_toward_a_higher_target() {
        let mut r = rec(1_000, 2_000, 0);
        assert!(advance(&mut r, NOW, WINDOW));

        // step = max(0, ceil(1000 * 0.10), 100) = 100
        assert_eq!(r.public_price, 1_100);
        assert_eq!(r.decay_step, 100);
        assert_eq!(r.next_adjustment_at, WINDOW);
    }

    #[test]
    fn falls_twice_as_fast_as_it_rises() {
        let mut r = rec(2_000, 1_000, 0);
        advance(&mut r, NOW, WINDOW);

        // step = 200, fall = 2 * step
        assert_eq!(r.public_price, 1_600);
    }

    #[test]
    fn never_overshoots_the_target() {
        let mut r = rec(1_950, 2_000, 500);
        advance(&mut r, NOW, WINDOW);
        assert_eq!(r.public_price, 2_000);
        assert_eq!(r.decay_step, 0);
    }

    #[test]
    fn extinction_snaps_instead_of_decaying() {
        let mut r = rec(5_000, EXTINCT, 0);
        advance(&mut r, NOW, WINDOW);
        assert_eq!(r.public_price, EXTINCT);

        let mut r = rec(EXTINCT, 5_000, 0);
        advance(&mut r, NOW, WINDOW);
        assert_eq!(r.public_price, 5_000);

        let mut r = rec(200, PRICE_CEILING, 0);
        advance(&mut r, NOW, WINDOW);
        assert_eq!(r.public_price, PRICE_CEILING);
    }

    #[test]
    fn small_targets_are_not_rounded() {
        let mut r = rec(40, 97, 0);
        advance(&mut r, NOW, WINDOW);
        // target stays 97 exactly; one step of 100 is clamped to it
        assert_eq!(r.public_price, 97);
    }

    #[test]
    fn frozen_until_the_window_unless_epoch_is_stale() {
        let mut r = rec(1_000, 2_000, 0);
        r.next_adjustment_at = NOW + 60;
        assert!(!advance(&mut r, NOW, WINDOW));

        // An epoch beyond the window forces a one-time reset
        r.next_adjustment_at = WINDOW + 1;
        assert!(advance(&mut r, NOW, WINDOW));
        assert_eq!(r.next_adjustment_at, WINDOW);
    }

    #[test]
    fn existing_larger_decay_step_is_kept() {
        let mut r = rec(1_000, 9_900, 4_000);
        advance(&mut r, NOW, WINDOW);

        // target rounds to 9_900; rise of one 4_000 step, then rounding
        assert_eq!(r.decay_step, 4_000);
        assert_eq!(r.public_price, 5_000);
    }
}

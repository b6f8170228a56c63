//! Property tests for price rounding and the decay state machine.

use proptest::prelude::*;
use repricer::advance;
use types::{rounded_estimate, ItemRecord, SaleRecord};

const NOW: i64 = 1_000_000;
const WINDOW: i64 = NOW + 10 * 60 * 60;

fn record(public: i64, real: i64, decay_step: i64) -> ItemRecord {
    let sale = SaleRecord {
        transaction_id: 1,
        item_id: 1,
        volume: 1,
        unit_cost: public,
        timestamp: 0,
    };
    let mut rec = ItemRecord::from_sale(1, "prop item".to_string(), 10, &sale);
    rec.public_price = public;
    rec.real_market_price = real;
    rec.decay_step = decay_step;
    rec.next_adjustment_at = 0;
    rec
}

fn displayed_target(real: i64) -> i64 {
    if real > 100 {
        rounded_estimate(real)
    } else {
        real
    }
}

proptest! {
    #[test]
    fn rounding_is_idempotent(price in 0_i64..=999_999_999) {
        let once = rounded_estimate(price);
        prop_assert_eq!(rounded_estimate(once), once);
    }

    #[test]
    fn rounding_preserves_order(a in 0_i64..=999_999_999, b in 0_i64..=999_999_999) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(rounded_estimate(lo) <= rounded_estimate(hi));
    }

    #[test]
    fn advance_stays_between_public_and_target(
        public in 0_i64..10_000_000,
        real in 0_i64..10_000_000,
        decay_step in 0_i64..100_000,
    ) {
        let mut rec = record(public, real, decay_step);
        advance(&mut rec, NOW, WINDOW);

        let target = displayed_target(real);
        let lo = public.min(target);
        let hi = public.max(target);
        prop_assert!(rec.public_price >= lo && rec.public_price <= hi,
            "moved to {} outside [{}, {}]", rec.public_price, lo, hi);
    }

    #[test]
    fn repeated_advances_converge(
        public in 0_i64..10_000_000,
        real in 0_i64..10_000_000,
    ) {
        let mut rec = record(public, real, 0);
        let target = displayed_target(real);

        let mut steps = 0;
        while rec.public_price != target {
            rec.next_adjustment_at = 0;
            advance(&mut rec, NOW, WINDOW);
            steps += 1;
            prop_assert!(steps < 500, "stuck at {} after {} steps", rec.public_price, steps);
        }

        // One more pass confirms convergence and clears the step
        rec.next_adjustment_at = 0;
        advance(&mut rec, NOW, WINDOW);
        prop_assert_eq!(rec.public_price, target);
        prop_assert_eq!(rec.decay_step, 0);
    }
}

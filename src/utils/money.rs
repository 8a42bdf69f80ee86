//! Integer money arithmetic in minor currency units (cents).
//!
//! Cash, prices and P&L are stored as `i64` minor units. Fractions
//! (allocation percentages, averaging weights) go through `Decimal` so the
//! rounding step is explicit and exact.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Portion of `total` assigned by `fraction`, rounded down to whole minor units.
///
/// `floor_share(100_000, 0.3) == 30_000`; `floor_share(999, 0.5) == 499`.
pub fn floor_share(total: i64, fraction: Decimal) -> i64 {
    (Decimal::from(total) * fraction)
        .floor()
        .to_i64()
        .unwrap_or(0)
}

/// Volume-weighted average of an existing holding and a new lot, rounded to
/// the nearest minor unit (midpoints away from zero).
///
/// Returns `lot_price` when the combined quantity is not positive.
pub fn rounded_weighted_average(
    held_avg: i64,
    held_qty: i64,
    lot_price: i64,
    lot_qty: i64,
) -> i64 {
    let total_qty = held_qty.saturating_add(lot_qty);
    if total_qty <= 0 {
        return lot_price;
    }

    let weighted = Decimal::from(held_avg) * Decimal::from(held_qty)
        + Decimal::from(lot_price) * Decimal::from(lot_qty);

    (weighted / Decimal::from(total_qty))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(lot_price)
}

/// Subtract `amount` from `balance`, flooring the result at zero.
pub fn saturating_release(balance: i64, amount: i64) -> i64 {
    (balance - amount).max(0)
}

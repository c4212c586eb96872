use rust_decimal::{Decimal, RoundingStrategy};

/// Fixed number of decimal places every monetary value and quantity is held at
pub const MONEY_DP: u32 = 8;

/// Truncate toward zero at `MONEY_DP` places and pin the scale, so equal values
/// always carry an identical representation.
pub fn quantize(value: Decimal) -> Decimal {
    let mut q = value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::ToZero);
    if q.is_zero() {
        q = Decimal::ZERO;
    }
    q.rescale(MONEY_DP);
    q
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange trading rules for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRules {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    #[serde(default)]
    pub min_notional: Decimal,
}

impl SymbolRules {
    pub fn new(tick_size: Decimal, step_size: Decimal, min_notional: Decimal) -> Self {
        Self {
            tick_size,
            step_size,
            min_notional,
        }
    }

    pub fn round_price(&self, price: Decimal) -> Decimal {
        floor_to_increment(price, self.tick_size)
    }

    pub fn round_qty(&self, qty: Decimal) -> Decimal {
        floor_to_increment(qty, self.step_size)
    }

    pub fn meets_min_notional(&self, price: Decimal, qty: Decimal) -> bool {
        price * qty >= self.min_notional
    }
}

/// Floor `value` to a multiple of `increment`; non-positive increments leave it as is
pub fn floor_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    ((value / increment).floor() * increment).normalize()
}

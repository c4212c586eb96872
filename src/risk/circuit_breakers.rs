use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Portfolio-wide hard stops. Tripping one halts every new action in the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakers {
    pub max_daily_loss_try: Decimal,
    pub max_drawdown_ratio: Decimal,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            max_daily_loss_try: dec!(1000), // TRY lost today
            max_drawdown_ratio: dec!(0.20), // 20% from peak equity
        }
    }
}

/// PnL figures the breakers are evaluated against
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlSnapshot {
    pub realized_today_try: Decimal,
    pub drawdown_ratio: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitBreakerTrip {
    DailyLoss,
    MaxDrawdown,
}

impl CircuitBreakers {
    pub fn check(&self, pnl: &PnlSnapshot) -> Result<(), CircuitBreakerTrip> {
        // Check daily loss
        if pnl.realized_today_try <= -self.max_daily_loss_try {
            return Err(CircuitBreakerTrip::DailyLoss);
        }

        // Check drawdown
        if pnl.drawdown_ratio >= self.max_drawdown_ratio {
            return Err(CircuitBreakerTrip::MaxDrawdown);
        }

        Ok(())
    }
}

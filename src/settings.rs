use crate::execution::{RateLimitBudget, RetryConfig};
use crate::planner::{PlannerConfig, SymbolRules};
use crate::risk::RiskLimits;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const ENV_PREFIX: &str = "TRADEBOT";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalSettings {
    pub initial_trading_capital_try: Decimal,
    pub initial_treasury_try: Decimal,
    /// Share of new realized profit swept into treasury
    pub treasury_share: Decimal,
}

impl Default for CapitalSettings {
    fn default() -> Self {
        Self {
            initial_trading_capital_try: dec!(10000),
            initial_treasury_try: Decimal::ZERO,
            treasury_share: dec!(0.25),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub idempotency_ttl_sec: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            database_url: None,
            idempotency_ttl_sec: 300,
        }
    }
}

/// Full bot configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub planner: PlannerConfig,
    pub risk: RiskLimits,
    pub execution: RetryConfig,
    pub rate_limit: Option<RateLimitBudget>,
    pub capital: CapitalSettings,
    pub storage: StorageSettings,
    /// Trading rules keyed by symbol
    pub symbols: HashMap<String, SymbolRules>,
}

impl Settings {
    /// Load `config/default` (if present), then `path` (if given), then
    /// `TRADEBOT__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings = config.try_deserialize::<Settings>()?;

        // Keys come back lowercased from the config crate
        settings.symbols = settings
            .symbols
            .into_iter()
            .map(|(symbol, rules)| (symbol.to_ascii_uppercase(), rules))
            .collect();

        settings.validate()?;

        tracing::info!(
            "Loaded settings: {} symbols, max_open_orders={}, treasury_share={}",
            settings.symbols.len(),
            settings.risk.max_open_orders,
            settings.capital.treasury_share
        );

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let fail = |msg: String| Err(SettingsError::Validation(msg));

        if self.execution.submit_max_attempts == 0 || self.execution.cancel_max_attempts == 0 {
            return fail("execution max attempts must be at least 1".to_string());
        }
        if self.execution.max_delay_ms < self.execution.base_delay_ms {
            return fail("execution.max_delay_ms must be >= base_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.execution.jitter_ratio) {
            return fail(format!(
                "execution.jitter_ratio must be within [0, 1], got {}",
                self.execution.jitter_ratio
            ));
        }

        let risk = &self.risk;
        let non_negative = [
            ("risk.max_position_notional_try", risk.max_position_notional_try),
            ("risk.max_daily_loss_try", risk.max_daily_loss_try),
            ("risk.max_drawdown_ratio", risk.max_drawdown_ratio),
            (
                "risk.replace_inflight_budget_per_symbol_try",
                risk.replace_inflight_budget_per_symbol_try,
            ),
            ("risk.fee_bps", risk.fee_bps),
            ("risk.slippage_buffer_bps", risk.slippage_buffer_bps),
            ("risk.min_profit_bps", risk.min_profit_bps),
            ("planner.drift_bps", self.planner.drift_bps),
            ("planner.price_tolerance_bps", self.planner.price_tolerance_bps),
            ("planner.qty_tolerance_ratio", self.planner.qty_tolerance_ratio),
            ("capital.initial_trading_capital_try", self.capital.initial_trading_capital_try),
            ("capital.initial_treasury_try", self.capital.initial_treasury_try),
        ];
        for (name, value) in non_negative {
            if value < Decimal::ZERO {
                return fail(format!("{name} must not be negative, got {value}"));
            }
        }

        if self.planner.stale_after_sec <= 0 {
            return fail("planner.stale_after_sec must be positive".to_string());
        }
        if self.capital.treasury_share < Decimal::ZERO || self.capital.treasury_share > Decimal::ONE {
            return fail(format!(
                "capital.treasury_share must be within [0, 1], got {}",
                self.capital.treasury_share
            ));
        }
        if let Some(budget) = &self.rate_limit {
            if budget.requests_per_second == 0 {
                return fail("rate_limit.requests_per_second must be at least 1".to_string());
            }
        }
        for (symbol, rules) in &self.symbols {
            if rules.tick_size < Decimal::ZERO || rules.step_size < Decimal::ZERO || rules.min_notional < Decimal::ZERO {
                return fail(format!("symbols.{symbol} rules must not be negative"));
            }
        }

        Ok(())
    }
}

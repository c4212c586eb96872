use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order side on the spot book
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Kind of exchange action a plan can contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Submit,
    Cancel,
    Replace,
}

impl ActionType {
    /// Sort priority inside a (symbol, side) key: cancels first, submits last
    pub fn priority(&self) -> u8 {
        match self {
            ActionType::Cancel => 0,
            ActionType::Replace => 1,
            ActionType::Submit => 2,
        }
    }
}

/// Machine-readable reason codes emitted by the lifecycle planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    InvalidIntent,
    MinNotional,
    Deduped,
    NewIntent,
    ReplaceCancel,
    ReplaceSubmit,
    Stale,
}

impl PlanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanReason::InvalidIntent => "invalid_intent",
            PlanReason::MinNotional => "min_notional",
            PlanReason::Deduped => "deduped",
            PlanReason::NewIntent => "new_intent",
            PlanReason::ReplaceCancel => "replace_cancel",
            PlanReason::ReplaceSubmit => "replace_submit",
            PlanReason::Stale => "stale",
        }
    }
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A desired resting limit order, as produced by a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

impl OrderIntent {
    pub fn new(symbol: impl Into<String>, side: Side, price: Decimal, qty: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            qty,
            client_order_id: None,
        }
    }

    pub fn with_client_order_id(self, client_order_id: impl Into<String>) -> Self {
        Self {
            client_order_id: Some(client_order_id.into()),
            ..self
        }
    }
}

/// An order currently resting on the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub client_order_id: String,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OpenOrder {
    pub fn notional(&self) -> Decimal {
        self.price * self.qty
    }
}

/// One step of a lifecycle plan. Never mutated after creation; use the `with_*` helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub reason: PlanReason,
    pub client_order_id: String,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    #[serde(default)]
    pub replace_for_client_order_id: Option<String>,
}

impl LifecycleAction {
    pub fn submit(intent: &OrderIntent, client_order_id: String, reason: PlanReason) -> Self {
        Self {
            action_type: ActionType::Submit,
            symbol: intent.symbol.clone(),
            side: intent.side,
            price: intent.price,
            qty: intent.qty,
            reason,
            client_order_id,
            exchange_order_id: None,
            replace_for_client_order_id: None,
        }
    }

    pub fn cancel(order: &OpenOrder, reason: PlanReason) -> Self {
        Self {
            action_type: ActionType::Cancel,
            symbol: order.symbol.clone(),
            side: order.side,
            price: order.price,
            qty: order.qty,
            reason,
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: order.exchange_order_id.clone(),
            replace_for_client_order_id: None,
        }
    }

    pub fn with_replace_for(self, client_order_id: impl Into<String>) -> Self {
        Self {
            replace_for_client_order_id: Some(client_order_id.into()),
            ..self
        }
    }

    pub fn with_exchange_order_id(self, exchange_order_id: impl Into<String>) -> Self {
        Self {
            exchange_order_id: Some(exchange_order_id.into()),
            ..self
        }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.qty
    }

    /// True when this submit is the second half of a cancel/replace pair
    pub fn is_replace_submit(&self) -> bool {
        self.reason == PlanReason::ReplaceSubmit || self.replace_for_client_order_id.is_some()
    }
}

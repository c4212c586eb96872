use crate::accounting::quantize::quantize;
use crate::models::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Fill,
    Fee,
    FundingCost,
    Slippage,
    Transfer,
    Rebalance,
    Withdrawal,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Fill => "FILL",
            EventType::Fee => "FEE",
            EventType::FundingCost => "FUNDING_COST",
            EventType::Slippage => "SLIPPAGE",
            EventType::Transfer => "TRANSFER",
            EventType::Rebalance => "REBALANCE",
            EventType::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FILL" => Ok(EventType::Fill),
            "FEE" => Ok(EventType::Fee),
            "FUNDING_COST" => Ok(EventType::FundingCost),
            "SLIPPAGE" => Ok(EventType::Slippage),
            "TRANSFER" => Ok(EventType::Transfer),
            "REBALANCE" => Ok(EventType::Rebalance),
            "WITHDRAWAL" => Ok(EventType::Withdrawal),
            other => Err(format!("unknown ledger event type: {other}")),
        }
    }
}

/// Append-only ledger entry. Identity is `event_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default)]
    pub qty: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub fee_currency: Option<String>,
    /// Exchange trade id, unique in the durable store
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Ordering used to pick a winner among duplicates sharing an `event_id`
type TieBreakKey<'a> = (
    &'a DateTime<Utc>,
    EventType,
    &'a Option<String>,
    &'a Option<Side>,
    &'a Decimal,
    &'a Option<Decimal>,
    &'a Option<Decimal>,
    &'a Option<String>,
    &'a Option<String>,
    &'a BTreeMap<String, String>,
);

impl LedgerEvent {
    pub fn new(event_id: impl Into<String>, ts: DateTime<Utc>, event_type: EventType) -> Self {
        Self {
            event_id: event_id.into(),
            ts,
            event_type,
            symbol: None,
            side: None,
            qty: Decimal::ZERO,
            price: None,
            amount: None,
            fee_currency: None,
            reference_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn fill(
        event_id: impl Into<String>,
        ts: DateTime<Utc>,
        symbol: impl Into<String>,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: Some(symbol.into()),
            side: Some(side),
            qty,
            price: Some(price),
            ..Self::new(event_id, ts, EventType::Fill)
        }
    }

    /// Amount-only event (FEE, FUNDING_COST, SLIPPAGE, TRANSFER, REBALANCE, WITHDRAWAL)
    pub fn cash(
        event_id: impl Into<String>,
        ts: DateTime<Utc>,
        event_type: EventType,
        amount: Decimal,
    ) -> Self {
        Self {
            amount: Some(amount),
            ..Self::new(event_id, ts, event_type)
        }
    }

    pub fn with_symbol(self, symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..self
        }
    }

    pub fn with_fee_currency(self, currency: impl Into<String>) -> Self {
        Self {
            fee_currency: Some(currency.into()),
            ..self
        }
    }

    pub fn with_reference_id(self, reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            ..self
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy with every numeric field held at the ledger's fixed precision
    pub fn quantized(&self) -> Self {
        Self {
            qty: quantize(self.qty),
            price: self.price.map(quantize),
            amount: self.amount.map(quantize),
            ..self.clone()
        }
    }

    pub(crate) fn tie_break_key(&self) -> TieBreakKey<'_> {
        (
            &self.ts,
            self.event_type,
            &self.symbol,
            &self.side,
            &self.qty,
            &self.price,
            &self.amount,
            &self.fee_currency,
            &self.reference_id,
            &self.metadata,
        )
    }
}

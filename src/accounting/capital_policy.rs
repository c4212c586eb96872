use crate::accounting::events::{EventType, LedgerEvent};
use crate::accounting::ledger::PortfolioAccountingState;
use crate::accounting::quantize::quantize;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CapitalPolicyError {
    #[error("treasury share must be within [0, 1], got {0}")]
    InvalidShare(Decimal),

    #[error("checkpoint event_count must increase: previous {previous}, next {next}")]
    NonMonotonicCheckpoint { previous: u64, next: u64 },
}

/// Realized profit already split between trading capital and treasury
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalCheckpoint {
    pub event_count: u64,
    pub realized_pnl_try: Decimal,
    pub swept_to_treasury_try: Decimal,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebalancePlan {
    /// REBALANCE event to append, absent when there is nothing new to sweep
    pub event: Option<LedgerEvent>,
    pub checkpoint: CapitalCheckpoint,
}

/// Self-financing policy: a fixed share of each new realized profit goes to treasury,
/// the rest stays in trading capital. Losses are never clawed back from treasury.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapitalPolicy {
    treasury_share: Decimal,
}

impl CapitalPolicy {
    pub fn new(treasury_share: Decimal) -> Result<Self, CapitalPolicyError> {
        if treasury_share < Decimal::ZERO || treasury_share > Decimal::ONE {
            return Err(CapitalPolicyError::InvalidShare(treasury_share));
        }
        Ok(Self { treasury_share })
    }

    pub fn treasury_share(&self) -> Decimal {
        self.treasury_share
    }

    pub fn next_rebalance(
        &self,
        state: &PortfolioAccountingState,
        previous: Option<&CapitalCheckpoint>,
        event_count: u64,
        ts: DateTime<Utc>,
    ) -> Result<RebalancePlan, CapitalPolicyError> {
        let (prev_realized, prev_swept) = match previous {
            Some(cp) => {
                if event_count <= cp.event_count {
                    return Err(CapitalPolicyError::NonMonotonicCheckpoint {
                        previous: cp.event_count,
                        next: event_count,
                    });
                }
                (cp.realized_pnl_try, cp.swept_to_treasury_try)
            }
            None => (Decimal::ZERO, Decimal::ZERO),
        };

        let realized = quantize(state.realized_pnl_try);
        let delta = quantize(realized - prev_realized);
        let sweep = if delta > Decimal::ZERO {
            quantize(delta * self.treasury_share)
        } else {
            quantize(Decimal::ZERO)
        };

        let event = (sweep > Decimal::ZERO).then(|| {
            LedgerEvent::cash(
                format!("rebalance-{event_count}"),
                ts,
                EventType::Rebalance,
                sweep,
            )
            .with_metadata("realized_delta_try", delta.to_string())
        });

        if let Some(event) = &event {
            tracing::info!(
                event_id = %event.event_id,
                sweep = %sweep,
                realized_delta = %delta,
                "Sweeping realized profit to treasury"
            );
        }

        Ok(RebalancePlan {
            event,
            checkpoint: CapitalCheckpoint {
                event_count,
                realized_pnl_try: realized,
                swept_to_treasury_try: quantize(prev_swept + sweep),
                ts,
            },
        })
    }

    /// Like `next_rebalance`, but `None` when the log has not grown past `previous`.
    /// Callers replaying a persisted ledger go through this so a rerun never sweeps twice.
    pub fn rebalance_since(
        &self,
        state: &PortfolioAccountingState,
        previous: Option<&CapitalCheckpoint>,
        event_count: u64,
        ts: DateTime<Utc>,
    ) -> Result<Option<RebalancePlan>, CapitalPolicyError> {
        if let Some(cp) = previous {
            if event_count <= cp.event_count {
                tracing::debug!(
                    checkpoint = cp.event_count,
                    event_count,
                    "No new ledger events since last capital checkpoint"
                );
                return Ok(None);
            }
        }
        self.next_rebalance(state, previous, event_count, ts).map(Some)
    }
}

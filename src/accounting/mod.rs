// Deterministic, replayable accounting over the append-only event log
pub mod capital_policy;
pub mod events;
pub mod ledger;
pub mod quantize;

pub use capital_policy::{CapitalCheckpoint, CapitalPolicy, CapitalPolicyError, RebalancePlan};
pub use events::{EventType, LedgerEvent};
pub use ledger::{
    recompute, LedgerError, PortfolioAccountingState, PositionLot, SymbolAccounting,
    QUOTE_CURRENCY,
};
pub use quantize::{quantize, MONEY_DP};

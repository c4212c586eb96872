// One trading cycle: planner -> risk -> execution
pub mod cycle;

pub use cycle::{
    risk_inputs, CycleInput, CycleReport, EngineError, ExecutedAction, TradingCycle,
    UnfinishedAction, IDEMPOTENT_DUPLICATE,
};

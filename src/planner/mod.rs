// Order lifecycle planning: intents + open orders -> SUBMIT/CANCEL/REPLACE actions
pub mod lifecycle;
pub mod rules;

pub use lifecycle::{LifecyclePlan, LifecyclePlanner, PlanAudit, PlannerConfig};
pub use rules::SymbolRules;

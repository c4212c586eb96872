use crate::accounting::PortfolioAccountingState;
use crate::execution::{
    ActionResult, ErrorCategory, ExchangeAdapter, ExchangeError, ExecutionOutcome, ExecutionWrapper,
};
use crate::instrumentation::Instrumentation;
use crate::models::{ActionType, LifecycleAction, OpenOrder, OrderIntent, Side};
use crate::persistence::IdempotencyStore;
use crate::planner::{LifecyclePlanner, PlanAudit};
use crate::risk::{PnlSnapshot, PositionSnapshot, RiskAdmission, RiskDecision};
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const IDEMPOTENT_DUPLICATE: &str = "idempotent_duplicate";

#[derive(Debug, Error)]
pub enum EngineError {
    /// Credentials are broken; no further action in this cycle can succeed
    #[error("authentication failed while executing {client_order_id}: {source}")]
    Auth {
        client_order_id: String,
        #[source]
        source: ExchangeError,
    },

    #[error("state store error: {0}")]
    Store(String),
}

/// Everything one cycle needs, captured at the start of the cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleInput {
    pub intents: Vec<OrderIntent>,
    pub open_orders: Vec<OpenOrder>,
    pub mid_prices: HashMap<String, Decimal>,
    #[serde(default = "Utc::now")]
    pub now: DateTime<Utc>,
    pub pnl: PnlSnapshot,
    pub positions: HashMap<String, PositionSnapshot>,
    pub current_position_notional: Decimal,
}

impl CycleInput {
    /// Fill risk inputs (positions and exposure) from an accounting snapshot
    pub fn with_accounting(mut self, state: &PortfolioAccountingState) -> Self {
        let (notional, positions) = risk_inputs(state);
        self.current_position_notional = notional;
        self.positions = positions;
        self
    }
}

/// Current exposure at cost and per-symbol holdings, as risk admission expects them
pub fn risk_inputs(state: &PortfolioAccountingState) -> (Decimal, HashMap<String, PositionSnapshot>) {
    let positions = state
        .symbols
        .iter()
        .filter(|(_, s)| s.qty > Decimal::ZERO)
        .map(|(symbol, s)| {
            (
                symbol.clone(),
                PositionSnapshot {
                    qty: s.qty,
                    avg_cost: s.avg_cost,
                },
            )
        })
        .collect();
    (state.inventory_cost_try, positions)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub action_type: ActionType,
    pub symbol: String,
    pub side: Side,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    /// For cancels: whether the exchange still had the order
    pub cancelled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfinishedAction {
    pub action_type: ActionType,
    pub symbol: String,
    pub client_order_id: String,
    pub reason: String,
    pub category: Option<ErrorCategory>,
}

impl UnfinishedAction {
    fn new(action: &LifecycleAction, reason: impl Into<String>, category: Option<ErrorCategory>) -> Self {
        Self {
            action_type: action.action_type,
            symbol: action.symbol.clone(),
            client_order_id: action.client_order_id.clone(),
            reason: reason.into(),
            category,
        }
    }
}

/// What happened to every intent and action in one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub audit: Vec<PlanAudit>,
    pub decisions: Vec<RiskDecision>,
    pub executed: Vec<ExecutedAction>,
    pub skipped: Vec<UnfinishedAction>,
    pub failed: Vec<UnfinishedAction>,
    /// Outcome unknown; reconcile before retrying these
    pub uncertain: Vec<UnfinishedAction>,
}

/// Plan -> admit -> execute, once
pub struct TradingCycle {
    planner: LifecyclePlanner,
    risk: RiskAdmission,
    wrapper: ExecutionWrapper,
    idempotency: Arc<dyn IdempotencyStore>,
    idempotency_ttl: Duration,
}

impl TradingCycle {
    pub fn new(
        planner: LifecyclePlanner,
        risk: RiskAdmission,
        wrapper: ExecutionWrapper,
        idempotency: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            planner,
            risk,
            wrapper,
            idempotency,
            idempotency_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn from_settings(
        settings: &Settings,
        adapter: Arc<dyn ExchangeAdapter>,
        idempotency: Arc<dyn IdempotencyStore>,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Self {
        let planner = LifecyclePlanner::new(settings.planner.clone())
            .with_symbol_rules(settings.symbols.clone());
        let risk = RiskAdmission::new(settings.risk.clone());
        let wrapper = ExecutionWrapper::new(adapter, settings.execution.clone())
            .with_instrumentation(instrumentation);
        Self::new(planner, risk, wrapper, idempotency)
            .with_idempotency_ttl(Duration::from_secs(settings.storage.idempotency_ttl_sec))
    }

    fn idempotency_key(action: &LifecycleAction) -> String {
        format!("submit:{}", action.client_order_id)
    }

    pub async fn run(&self, input: &CycleInput) -> Result<CycleReport, EngineError> {
        let plan = self
            .planner
            .plan(&input.intents, &input.open_orders, &input.mid_prices, input.now);

        let (accepted, decisions) = self.risk.filter_actions(
            &plan.actions,
            input.open_orders.len(),
            input.current_position_notional,
            &input.pnl,
            &input.positions,
        );

        let mut report = CycleReport {
            audit: plan.audit,
            decisions,
            ..CycleReport::default()
        };

        for action in &accepted {
            let key = match action.action_type {
                ActionType::Submit | ActionType::Replace => Some(Self::idempotency_key(action)),
                ActionType::Cancel => None,
            };

            if let Some(key) = &key {
                let reserved = self
                    .idempotency
                    .reserve(key, self.idempotency_ttl)
                    .await
                    .map_err(|e| EngineError::Store(e.to_string()))?;
                if !reserved {
                    tracing::info!(
                        "Skipping {} for {}: already submitted within the dedupe window",
                        action.client_order_id,
                        action.symbol
                    );
                    report
                        .skipped
                        .push(UnfinishedAction::new(action, IDEMPOTENT_DUPLICATE, None));
                    continue;
                }
            }

            match self.wrapper.execute_action(action).await {
                Ok(ExecutionOutcome::Completed(result)) => {
                    report.executed.push(executed(action, result));
                }
                Ok(ExecutionOutcome::Uncertain(u)) => {
                    // Key stays reserved so nothing resubmits before reconciliation
                    tracing::warn!(
                        "Outcome of {} {} on {} is uncertain: {}",
                        u.action,
                        action.client_order_id,
                        action.symbol,
                        u.error
                    );
                    report.uncertain.push(UnfinishedAction::new(
                        action,
                        u.error.to_string(),
                        Some(u.category),
                    ));
                }
                Err(error) => {
                    if let Some(key) = &key {
                        self.idempotency
                            .release(key)
                            .await
                            .map_err(|e| EngineError::Store(e.to_string()))?;
                    }
                    let category = self.wrapper.classify(&error);
                    if category == ErrorCategory::Auth {
                        tracing::error!("Authentication failure, aborting cycle: {}", error);
                        return Err(EngineError::Auth {
                            client_order_id: action.client_order_id.clone(),
                            source: error,
                        });
                    }
                    report
                        .failed
                        .push(UnfinishedAction::new(action, error.to_string(), Some(category)));
                }
            }
        }

        tracing::info!(
            "Cycle done: {} planned, {} accepted, {} executed, {} skipped, {} failed, {} uncertain",
            plan.actions.len(),
            accepted.len(),
            report.executed.len(),
            report.skipped.len(),
            report.failed.len(),
            report.uncertain.len()
        );

        Ok(report)
    }
}

fn executed(action: &LifecycleAction, result: ActionResult) -> ExecutedAction {
    let (exchange_order_id, cancelled) = match result {
        ActionResult::Submitted(ack) => (Some(ack.exchange_order_id), None),
        ActionResult::Cancelled(found) => (action.exchange_order_id.clone(), Some(found)),
        ActionResult::Replaced { cancelled, ack } => (Some(ack.exchange_order_id), Some(cancelled)),
    };
    ExecutedAction {
        action_type: action.action_type,
        symbol: action.symbol.clone(),
        side: action.side,
        client_order_id: action.client_order_id.clone(),
        exchange_order_id,
        cancelled,
    }
}

use crate::models::{ActionType, LifecycleAction, Side};
use crate::risk::circuit_breakers::{CircuitBreakerTrip, CircuitBreakers, PnlSnapshot};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const BPS: Decimal = dec!(10000);

/// Exposure, loss and profitability limits applied to every plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    pub max_open_orders: usize,
    pub max_position_notional_try: Decimal,
    pub max_daily_loss_try: Decimal,
    pub max_drawdown_ratio: Decimal,
    pub replace_inflight_budget_per_symbol_try: Decimal,
    pub fee_bps: Decimal,
    pub slippage_buffer_bps: Decimal,
    pub min_profit_bps: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_open_orders: 10,
            max_position_notional_try: dec!(50000),
            max_daily_loss_try: dec!(1000),
            max_drawdown_ratio: dec!(0.20),
            replace_inflight_budget_per_symbol_try: dec!(5000),
            fee_bps: dec!(10),
            slippage_buffer_bps: dec!(10),
            min_profit_bps: dec!(5),
        }
    }
}

impl RiskLimits {
    pub fn circuit_breakers(&self) -> CircuitBreakers {
        CircuitBreakers {
            max_daily_loss_try: self.max_daily_loss_try,
            max_drawdown_ratio: self.max_drawdown_ratio,
        }
    }

    /// Minimum sell price that clears fees, slippage and the profit floor
    pub fn min_sell_price(&self, avg_cost: Decimal) -> Decimal {
        let buffer_bps = self.fee_bps + self.slippage_buffer_bps + self.min_profit_bps;
        avg_cost * (Decimal::ONE + buffer_bps / BPS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskReason {
    Accepted,
    Passthrough,
    MaxDailyLoss,
    MaxDrawdown,
    MaxOpenOrders,
    #[serde(rename = "max_position_notional_try")]
    MaxPositionNotional,
    MinProfitThreshold,
    ReplaceInflightBudget,
}

impl RiskReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskReason::Accepted => "accepted",
            RiskReason::Passthrough => "passthrough",
            RiskReason::MaxDailyLoss => "max_daily_loss",
            RiskReason::MaxDrawdown => "max_drawdown",
            RiskReason::MaxOpenOrders => "max_open_orders",
            RiskReason::MaxPositionNotional => "max_position_notional_try",
            RiskReason::MinProfitThreshold => "min_profit_threshold",
            RiskReason::ReplaceInflightBudget => "replace_inflight_budget",
        }
    }

    pub fn is_accepting(&self) -> bool {
        matches!(self, RiskReason::Accepted | RiskReason::Passthrough)
    }
}

impl fmt::Display for RiskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CircuitBreakerTrip> for RiskReason {
    fn from(trip: CircuitBreakerTrip) -> Self {
        match trip {
            CircuitBreakerTrip::DailyLoss => RiskReason::MaxDailyLoss,
            CircuitBreakerTrip::MaxDrawdown => RiskReason::MaxDrawdown,
        }
    }
}

/// Audit record, one per input action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub action: LifecycleAction,
    pub accepted: bool,
    pub reason: RiskReason,
}

/// Held inventory for a symbol, as known to the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub qty: Decimal,
    pub avg_cost: Decimal,
}

/// Projected counters carried across one batch.
///
/// Each action computes a candidate next state; it replaces the current one only when
/// the action is accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionState {
    pub projected_open_orders: usize,
    pub projected_position_notional: Decimal,
    pub replace_inflight_by_symbol: HashMap<String, Decimal>,
}

impl AdmissionState {
    pub fn new(open_orders_count: usize, current_position_notional: Decimal) -> Self {
        Self {
            projected_open_orders: open_orders_count,
            projected_position_notional: current_position_notional,
            replace_inflight_by_symbol: HashMap::new(),
        }
    }

    fn inflight(&self, symbol: &str) -> Decimal {
        self.replace_inflight_by_symbol
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskAdmission {
    limits: RiskLimits,
}

impl RiskAdmission {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate one action against `state`, returning the verdict and the state to
    /// carry forward (unchanged on rejection).
    pub fn evaluate(
        &self,
        action: &LifecycleAction,
        state: &AdmissionState,
        positions_by_symbol: &HashMap<String, PositionSnapshot>,
    ) -> (RiskReason, AdmissionState) {
        match action.action_type {
            ActionType::Cancel => {
                let mut next = state.clone();
                next.projected_open_orders = next.projected_open_orders.saturating_sub(1);
                if action.side == Side::Buy {
                    let reduced = (next.inflight(&action.symbol) - action.notional()).max(Decimal::ZERO);
                    next.replace_inflight_by_symbol
                        .insert(action.symbol.clone(), reduced);
                }
                (RiskReason::Accepted, next)
            }
            ActionType::Replace => (RiskReason::Passthrough, state.clone()),
            ActionType::Submit => match self.evaluate_submit(action, state, positions_by_symbol) {
                Ok(next) => (RiskReason::Accepted, next),
                Err(reason) => (reason, state.clone()),
            },
        }
    }

    fn evaluate_submit(
        &self,
        action: &LifecycleAction,
        state: &AdmissionState,
        positions_by_symbol: &HashMap<String, PositionSnapshot>,
    ) -> Result<AdmissionState, RiskReason> {
        if state.projected_open_orders + 1 > self.limits.max_open_orders {
            return Err(RiskReason::MaxOpenOrders);
        }

        let notional = action.notional();
        let mut next = state.clone();
        next.projected_open_orders += 1;

        match action.side {
            Side::Buy => {
                if action.is_replace_submit() {
                    let inflight = next.inflight(&action.symbol) + notional;
                    if inflight > self.limits.replace_inflight_budget_per_symbol_try {
                        return Err(RiskReason::ReplaceInflightBudget);
                    }
                    next.replace_inflight_by_symbol
                        .insert(action.symbol.clone(), inflight);
                }
                next.projected_position_notional += notional;
                if next.projected_position_notional > self.limits.max_position_notional_try {
                    return Err(RiskReason::MaxPositionNotional);
                }
            }
            Side::Sell => {
                next.projected_position_notional =
                    (next.projected_position_notional - notional).max(Decimal::ZERO);
                if let Some(position) = positions_by_symbol.get(&action.symbol) {
                    if position.qty > Decimal::ZERO
                        && action.price < self.limits.min_sell_price(position.avg_cost)
                    {
                        return Err(RiskReason::MinProfitThreshold);
                    }
                }
            }
        }

        Ok(next)
    }

    /// Admit a plan in order. Later actions see the cumulative effect of earlier accepted ones.
    pub fn filter_actions(
        &self,
        actions: &[LifecycleAction],
        open_orders_count: usize,
        current_position_notional: Decimal,
        pnl: &PnlSnapshot,
        positions_by_symbol: &HashMap<String, PositionSnapshot>,
    ) -> (Vec<LifecycleAction>, Vec<RiskDecision>) {
        if let Err(trip) = self.limits.circuit_breakers().check(pnl) {
            let reason = RiskReason::from(trip);
            tracing::warn!(
                %reason,
                realized_today = %pnl.realized_today_try,
                drawdown = %pnl.drawdown_ratio,
                actions = actions.len(),
                "Circuit breaker tripped, rejecting batch"
            );
            let decisions = actions
                .iter()
                .map(|action| RiskDecision {
                    action: action.clone(),
                    accepted: false,
                    reason,
                })
                .collect();
            return (Vec::new(), decisions);
        }

        let mut state = AdmissionState::new(open_orders_count, current_position_notional);
        let mut accepted = Vec::new();
        let mut decisions = Vec::with_capacity(actions.len());

        for action in actions {
            let (reason, next) = self.evaluate(action, &state, positions_by_symbol);
            let ok = reason.is_accepting();
            if ok {
                state = next;
                accepted.push(action.clone());
            } else {
                tracing::warn!(
                    symbol = %action.symbol,
                    side = %action.side,
                    client_order_id = %action.client_order_id,
                    %reason,
                    "Action rejected by risk"
                );
            }
            decisions.push(RiskDecision {
                action: action.clone(),
                accepted: ok,
                reason,
            });
        }

        (accepted, decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderIntent, PlanReason};

    fn submit(side: Side, price: Decimal, qty: Decimal, cid: &str) -> LifecycleAction {
        let intent = OrderIntent::new("BTCTRY", side, price, qty);
        LifecycleAction::submit(&intent, cid.to_string(), PlanReason::NewIntent)
    }

    fn cancel(side: Side, price: Decimal, qty: Decimal, cid: &str) -> LifecycleAction {
        LifecycleAction {
            action_type: ActionType::Cancel,
            reason: PlanReason::Stale,
            ..submit(side, price, qty, cid)
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            max_open_orders: 2,
            max_position_notional_try: dec!(1000),
            replace_inflight_budget_per_symbol_try: dec!(300),
            fee_bps: dec!(10),
            slippage_buffer_bps: dec!(20),
            min_profit_bps: dec!(20),
            ..RiskLimits::default()
        }
    }

    fn no_positions() -> HashMap<String, PositionSnapshot> {
        HashMap::new()
    }

    #[test]
    fn test_max_open_orders_blocks_submit_not_cancel() {
        let risk = RiskAdmission::new(limits());
        let actions = vec![
            submit(Side::Buy, dec!(10), dec!(1), "a"),
            submit(Side::Buy, dec!(10), dec!(1), "b"),
            cancel(Side::Buy, dec!(10), dec!(1), "old"),
            submit(Side::Buy, dec!(10), dec!(1), "c"),
        ];
        let (accepted, decisions) =
            risk.filter_actions(&actions, 1, Decimal::ZERO, &PnlSnapshot::default(), &no_positions());

        let reasons: Vec<_> = decisions.iter().map(|d| d.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RiskReason::Accepted,
                RiskReason::MaxOpenOrders,
                RiskReason::Accepted,
                RiskReason::Accepted,
            ]
        );
        assert_eq!(accepted.len(), 3);
    }

    #[test]
    fn test_position_notional_accumulates_in_batch() {
        let risk = RiskAdmission::new(limits());
        let actions = vec![
            submit(Side::Buy, dec!(100), dec!(5), "a"),
            submit(Side::Buy, dec!(100), dec!(5), "b"),
        ];
        let (_, decisions) =
            risk.filter_actions(&actions, 0, dec!(100), &PnlSnapshot::default(), &no_positions());
        assert!(decisions[0].accepted);
        assert_eq!(decisions[1].reason, RiskReason::MaxPositionNotional);
    }

    #[test]
    fn test_daily_loss_rejects_whole_batch() {
        let risk = RiskAdmission::new(limits());
        let actions = vec![
            cancel(Side::Buy, dec!(10), dec!(1), "x"),
            submit(Side::Sell, dec!(10), dec!(1), "y"),
        ];
        let pnl = PnlSnapshot {
            realized_today_try: dec!(-1000),
            drawdown_ratio: Decimal::ZERO,
        };
        let (accepted, decisions) = risk.filter_actions(&actions, 0, Decimal::ZERO, &pnl, &no_positions());
        assert!(accepted.is_empty());
        assert!(decisions.iter().all(|d| d.reason == RiskReason::MaxDailyLoss && !d.accepted));
    }

    #[test]
    fn test_drawdown_rejects_whole_batch() {
        let risk = RiskAdmission::new(limits());
        let pnl = PnlSnapshot {
            realized_today_try: Decimal::ZERO,
            drawdown_ratio: dec!(0.2),
        };
        let actions = vec![submit(Side::Buy, dec!(1), dec!(1), "a")];
        let (_, decisions) = risk.filter_actions(&actions, 0, Decimal::ZERO, &pnl, &no_positions());
        assert_eq!(decisions[0].reason, RiskReason::MaxDrawdown);
    }

    #[test]
    fn test_min_profit_threshold_on_sell() {
        let risk = RiskAdmission::new(limits());
        let positions = HashMap::from([(
            "BTCTRY".to_string(),
            PositionSnapshot {
                qty: dec!(1),
                avg_cost: dec!(90),
            },
        )]);
        let actions = vec![
            submit(Side::Sell, dec!(90.40), dec!(1), "low"),
            submit(Side::Sell, dec!(90.50), dec!(1), "ok"),
        ];
        let (_, decisions) =
            risk.filter_actions(&actions, 0, Decimal::ZERO, &PnlSnapshot::default(), &positions);
        assert_eq!(decisions[0].reason, RiskReason::MinProfitThreshold);
        assert_eq!(decisions[1].reason, RiskReason::Accepted);
    }

    #[test]
    fn test_replace_inflight_budget() {
        let risk = RiskAdmission::new(limits());
        let first = submit(Side::Buy, dec!(100), dec!(2), "r1").with_replace_for("old-1");
        let second = submit(Side::Buy, dec!(100), dec!(2), "r2").with_replace_for("old-2");
        let (_, decisions) = risk.filter_actions(
            &[first, second],
            0,
            Decimal::ZERO,
            &PnlSnapshot::default(),
            &no_positions(),
        );
        assert!(decisions[0].accepted);
        assert_eq!(decisions[1].reason, RiskReason::ReplaceInflightBudget);
    }

    #[test]
    fn test_rejected_submit_leaves_state_untouched() {
        let risk = RiskAdmission::new(RiskLimits {
            max_position_notional_try: dec!(150),
            ..limits()
        });
        let state = AdmissionState::new(0, dec!(100));
        let action = submit(Side::Buy, dec!(100), dec!(1), "big").with_replace_for("old");

        let (reason, next) = risk.evaluate(&action, &state, &no_positions());
        assert_eq!(reason, RiskReason::MaxPositionNotional);
        assert_eq!(next, state);
        assert!(next.replace_inflight_by_symbol.is_empty());
    }

    #[test]
    fn test_buy_cancel_releases_inflight() {
        let risk = RiskAdmission::new(limits());
        let mut state = AdmissionState::new(1, Decimal::ZERO);
        state
            .replace_inflight_by_symbol
            .insert("BTCTRY".to_string(), dec!(250));

        let (_, next) = risk.evaluate(&cancel(Side::Buy, dec!(100), dec!(3), "c"), &state, &no_positions());
        assert_eq!(next.projected_open_orders, 0);
        assert_eq!(next.replace_inflight_by_symbol["BTCTRY"], Decimal::ZERO);
    }

    #[test]
    fn test_replace_action_passes_through() {
        let risk = RiskAdmission::new(limits());
        let action = LifecycleAction {
            action_type: ActionType::Replace,
            ..submit(Side::Buy, dec!(1_000_000), dec!(1), "r")
        };
        let state = AdmissionState::new(99, Decimal::ZERO);
        let (reason, next) = risk.evaluate(&action, &state, &no_positions());
        assert_eq!(reason, RiskReason::Passthrough);
        assert_eq!(next, state);
    }

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&RiskReason::MaxPositionNotional).unwrap(),
            "\"max_position_notional_try\""
        );
        assert_eq!(RiskReason::ReplaceInflightBudget.to_string(), "replace_inflight_budget");
    }
}

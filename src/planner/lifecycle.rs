use crate::execution::idempotency::{client_order_id, dedupe_bucket};
use crate::models::{LifecycleAction, OpenOrder, OrderIntent, PlanReason, Side};
use crate::planner::rules::SymbolRules;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

const BPS: Decimal = dec!(10000);

/// Tunables for the lifecycle planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Orders resting at least this long are stale
    pub stale_after_sec: i64,
    /// Orders whose price drifted this far from mid are stale
    pub drift_bps: Decimal,
    pub price_tolerance_bps: Decimal,
    pub qty_tolerance_ratio: Decimal,
    /// Width of the time bucket used when deriving client order ids
    pub idempotency_window_sec: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            stale_after_sec: 120,
            drift_bps: dec!(50),
            price_tolerance_bps: dec!(5),
            qty_tolerance_ratio: dec!(0.01),
            idempotency_window_sec: 30,
        }
    }
}

/// Why the planner did (or did not) act on an intent or open order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAudit {
    pub symbol: String,
    pub side: Side,
    pub client_order_id: Option<String>,
    pub reason: PlanReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePlan {
    pub actions: Vec<LifecycleAction>,
    pub audit: Vec<PlanAudit>,
}

impl LifecyclePlan {
    fn record(&mut self, symbol: &str, side: Side, client_order_id: Option<String>, reason: PlanReason) {
        self.audit.push(PlanAudit {
            symbol: symbol.to_string(),
            side,
            client_order_id,
            reason,
        });
    }
}

/// Turns desired intents plus the current book into an ordered action list
#[derive(Debug, Clone, Default)]
pub struct LifecyclePlanner {
    config: PlannerConfig,
    symbol_rules: HashMap<String, SymbolRules>,
}

impl LifecyclePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            symbol_rules: HashMap::new(),
        }
    }

    pub fn with_symbol_rules(mut self, rules: HashMap<String, SymbolRules>) -> Self {
        self.symbol_rules = rules;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Stale by age, or by drift from mid when a mid is known
    pub fn is_stale(&self, order: &OpenOrder, mid: Option<Decimal>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(order.created_at).num_seconds();
        if age >= self.config.stale_after_sec {
            return true;
        }
        match mid {
            Some(mid) if mid > Decimal::ZERO => {
                let drift = (order.price - mid).abs() / mid * BPS;
                drift >= self.config.drift_bps
            }
            _ => false,
        }
    }

    fn matches(&self, intent: &OrderIntent, order: &OpenOrder) -> bool {
        if intent.symbol != order.symbol || intent.side != order.side {
            return false;
        }
        if order.price <= Decimal::ZERO || order.qty <= Decimal::ZERO {
            return false;
        }
        let price_diff_bps = (intent.price - order.price).abs() / order.price * BPS;
        let qty_diff_ratio = (intent.qty - order.qty).abs() / order.qty;
        price_diff_bps <= self.config.price_tolerance_bps
            && qty_diff_ratio <= self.config.qty_tolerance_ratio
    }

    /// Apply tick/step rounding. `Err` carries the audit reason for dropping the intent.
    fn normalize(&self, intent: &OrderIntent) -> Result<OrderIntent, PlanReason> {
        if intent.price <= Decimal::ZERO || intent.qty <= Decimal::ZERO {
            return Err(PlanReason::InvalidIntent);
        }
        let Some(rules) = self.symbol_rules.get(&intent.symbol) else {
            return Ok(intent.clone());
        };
        let price = rules.round_price(intent.price);
        let qty = rules.round_qty(intent.qty);
        if price <= Decimal::ZERO || qty <= Decimal::ZERO {
            return Err(PlanReason::InvalidIntent);
        }
        if !rules.meets_min_notional(price, qty) {
            return Err(PlanReason::MinNotional);
        }
        Ok(OrderIntent {
            price,
            qty,
            ..intent.clone()
        })
    }

    pub fn plan(
        &self,
        intents: &[OrderIntent],
        open_orders: &[OpenOrder],
        mid_prices: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> LifecyclePlan {
        let mut plan = LifecyclePlan::default();
        let bucket = dedupe_bucket(now, self.config.idempotency_window_sec);

        let mut live: Vec<&OpenOrder> = Vec::new();
        let mut stale_by_key: BTreeMap<(String, Side), Vec<&OpenOrder>> = BTreeMap::new();
        for order in open_orders {
            let mid = mid_prices.get(&order.symbol).copied();
            if self.is_stale(order, mid, now) {
                stale_by_key
                    .entry((order.symbol.clone(), order.side))
                    .or_default()
                    .push(order);
            } else {
                live.push(order);
            }
        }
        for orders in stale_by_key.values_mut() {
            orders.sort_by(|a, b| {
                (a.created_at, &a.client_order_id).cmp(&(b.created_at, &b.client_order_id))
            });
        }

        let mut seen_ids: HashSet<String> = HashSet::new();

        for raw in intents {
            let intent = match self.normalize(raw) {
                Ok(intent) => intent,
                Err(reason) => {
                    tracing::debug!(symbol = %raw.symbol, side = %raw.side, %reason, "Dropping intent");
                    plan.record(&raw.symbol, raw.side, raw.client_order_id.clone(), reason);
                    continue;
                }
            };

            let cid = intent.client_order_id.clone().unwrap_or_else(|| {
                client_order_id(&intent.symbol, intent.side, intent.price, intent.qty, bucket)
            });

            if let Some(existing) = live.iter().find(|o| self.matches(&intent, o)) {
                plan.record(
                    &intent.symbol,
                    intent.side,
                    Some(existing.client_order_id.clone()),
                    PlanReason::Deduped,
                );
                continue;
            }
            if !seen_ids.insert(cid.clone()) {
                plan.record(&intent.symbol, intent.side, Some(cid), PlanReason::Deduped);
                continue;
            }

            let key = (intent.symbol.clone(), intent.side);
            match stale_by_key.remove(&key) {
                Some(stale) if !stale.is_empty() => {
                    for order in &stale {
                        plan.actions
                            .push(LifecycleAction::cancel(order, PlanReason::ReplaceCancel));
                    }
                    let replaced = stale[0].client_order_id.clone();
                    plan.actions.push(
                        LifecycleAction::submit(&intent, cid.clone(), PlanReason::ReplaceSubmit)
                            .with_replace_for(replaced),
                    );
                    plan.record(&intent.symbol, intent.side, Some(cid), PlanReason::ReplaceSubmit);
                }
                _ => {
                    plan.actions
                        .push(LifecycleAction::submit(&intent, cid.clone(), PlanReason::NewIntent));
                    plan.record(&intent.symbol, intent.side, Some(cid), PlanReason::NewIntent);
                }
            }
        }

        // Stale orders no intent claimed
        for orders in stale_by_key.into_values() {
            for order in orders {
                plan.actions.push(LifecycleAction::cancel(order, PlanReason::Stale));
                plan.record(
                    &order.symbol,
                    order.side,
                    Some(order.client_order_id.clone()),
                    PlanReason::Stale,
                );
            }
        }

        plan.actions.sort_by(|a, b| {
            (&a.symbol, a.side, a.action_type.priority(), &a.client_order_id).cmp(&(
                &b.symbol,
                b.side,
                b.action_type.priority(),
                &b.client_order_id,
            ))
        });

        tracing::debug!(
            intents = intents.len(),
            open_orders = open_orders.len(),
            actions = plan.actions.len(),
            "Lifecycle plan built"
        );

        plan
    }
}

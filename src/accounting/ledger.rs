use crate::accounting::events::{EventType, LedgerEvent};
use crate::accounting::quantize::quantize;
use crate::models::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use thiserror::Error;

/// Currency cash balances and PnL are kept in
pub const QUOTE_CURRENCY: &str = "TRY";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// Fills recorded a sell for more than the tracked inventory. Never absorbed.
    #[error("oversell on {symbol} at event {event_id}: requested {requested}, available {available}")]
    Oversell {
        symbol: String,
        event_id: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("malformed ledger event {event_id}: {reason}")]
    MalformedEvent { event_id: String, reason: String },
}

/// A FIFO-tracked batch of acquired quantity at a fixed unit cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLot {
    pub qty: Decimal,
    pub unit_cost: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Per-symbol slice of the accounting snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolAccounting {
    pub qty: Decimal,
    pub cost_basis: Decimal,
    pub avg_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub fees: Decimal,
    pub funding_costs: Decimal,
    pub slippage: Decimal,
    pub mark_price: Option<Decimal>,
    pub lots: Vec<PositionLot>,
}

/// Point-in-time portfolio state. Always rebuilt from the event log, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAccountingState {
    pub as_of: DateTime<Utc>,
    pub cash_try: Decimal,
    pub treasury_try: Decimal,
    pub inventory_cost_try: Decimal,
    pub trading_capital_try: Decimal,
    pub realized_pnl_try: Decimal,
    pub unrealized_pnl_try: Decimal,
    pub fees_try: Decimal,
    pub funding_costs_try: Decimal,
    pub slippage_try: Decimal,
    pub transfers_net_try: Decimal,
    pub withdrawals_try: Decimal,
    pub equity_try: Decimal,
    /// Fees charged in a currency other than the quote currency (no cash effect)
    pub fees_by_currency: BTreeMap<String, Decimal>,
    pub symbols: BTreeMap<String, SymbolAccounting>,
    pub events_applied: usize,
}

impl PortfolioAccountingState {
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolAccounting> {
        self.symbols.get(symbol)
    }
}

#[derive(Debug, Default)]
struct SymbolBook {
    lots: VecDeque<PositionLot>,
    realized_pnl: Decimal,
    fees: Decimal,
    funding_costs: Decimal,
    slippage: Decimal,
}

impl SymbolBook {
    fn available_qty(&self) -> Decimal {
        self.lots
            .iter()
            .fold(Decimal::ZERO, |acc, lot| quantize(acc + lot.qty))
    }
}

/// Running totals of the fold; every field is quantized after each step
#[derive(Debug)]
struct LedgerFold {
    cash: Decimal,
    treasury: Decimal,
    fees: Decimal,
    funding_costs: Decimal,
    slippage: Decimal,
    transfers_net: Decimal,
    withdrawals: Decimal,
    fees_by_currency: BTreeMap<String, Decimal>,
    books: BTreeMap<String, SymbolBook>,
}

impl LedgerFold {
    fn new(initial_trading_capital: Decimal, initial_treasury: Decimal) -> Self {
        Self {
            cash: quantize(initial_trading_capital),
            treasury: quantize(initial_treasury),
            fees: quantize(Decimal::ZERO),
            funding_costs: quantize(Decimal::ZERO),
            slippage: quantize(Decimal::ZERO),
            transfers_net: quantize(Decimal::ZERO),
            withdrawals: quantize(Decimal::ZERO),
            fees_by_currency: BTreeMap::new(),
            books: BTreeMap::new(),
        }
    }

    fn book(&mut self, symbol: &str) -> &mut SymbolBook {
        self.books.entry(symbol.to_string()).or_insert_with(|| SymbolBook {
            realized_pnl: quantize(Decimal::ZERO),
            fees: quantize(Decimal::ZERO),
            funding_costs: quantize(Decimal::ZERO),
            slippage: quantize(Decimal::ZERO),
            ..SymbolBook::default()
        })
    }

    fn apply(&mut self, event: &LedgerEvent) -> Result<(), LedgerError> {
        match event.event_type {
            EventType::Fill => self.apply_fill(event),
            EventType::Fee => {
                let amount = required_amount(event)?;
                let currency = event.fee_currency.as_deref().unwrap_or(QUOTE_CURRENCY);
                if currency != QUOTE_CURRENCY {
                    let total = self
                        .fees_by_currency
                        .entry(currency.to_string())
                        .or_insert(Decimal::ZERO);
                    *total = quantize(*total + amount);
                    return Ok(());
                }
                self.cash = quantize(self.cash - amount);
                self.fees = quantize(self.fees + amount);
                if let Some(symbol) = &event.symbol {
                    let book = self.book(symbol);
                    book.fees = quantize(book.fees + amount);
                }
                Ok(())
            }
            EventType::FundingCost => {
                let amount = required_amount(event)?;
                self.cash = quantize(self.cash - amount);
                self.funding_costs = quantize(self.funding_costs + amount);
                if let Some(symbol) = &event.symbol {
                    let book = self.book(symbol);
                    book.funding_costs = quantize(book.funding_costs + amount);
                }
                Ok(())
            }
            EventType::Slippage => {
                // Already embedded in the fill price
                let amount = required_amount(event)?;
                self.slippage = quantize(self.slippage + amount);
                if let Some(symbol) = &event.symbol {
                    let book = self.book(symbol);
                    book.slippage = quantize(book.slippage + amount);
                }
                Ok(())
            }
            EventType::Transfer => {
                let amount = required_amount(event)?;
                self.cash = quantize(self.cash + amount);
                self.transfers_net = quantize(self.transfers_net + amount);
                Ok(())
            }
            EventType::Rebalance => {
                // Positive amount sweeps trading capital into treasury
                let amount = required_amount(event)?;
                self.cash = quantize(self.cash - amount);
                self.treasury = quantize(self.treasury + amount);
                Ok(())
            }
            EventType::Withdrawal => {
                let amount = required_amount(event)?.abs();
                self.cash = quantize(self.cash - amount);
                self.withdrawals = quantize(self.withdrawals + amount);
                Ok(())
            }
        }
    }

    fn apply_fill(&mut self, event: &LedgerEvent) -> Result<(), LedgerError> {
        let symbol = event
            .symbol
            .as_deref()
            .ok_or_else(|| malformed(event, "fill without symbol"))?;
        let side = event.side.ok_or_else(|| malformed(event, "fill without side"))?;
        let price = event.price.ok_or_else(|| malformed(event, "fill without price"))?;
        let qty = event.qty;
        if qty <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(malformed(event, "fill with non-positive qty or price"));
        }
        let notional = quantize(price * qty);

        match side {
            Side::Buy => {
                self.book(symbol).lots.push_back(PositionLot {
                    qty,
                    unit_cost: price,
                    opened_at: event.ts,
                });
                self.cash = quantize(self.cash - notional);
            }
            Side::Sell => {
                let book = self.book(symbol);
                let available = book.available_qty();
                if qty > available {
                    tracing::error!(
                        symbol,
                        event_id = %event.event_id,
                        requested = %qty,
                        available = %available,
                        "Oversell against recorded inventory"
                    );
                    return Err(LedgerError::Oversell {
                        symbol: symbol.to_string(),
                        event_id: event.event_id.clone(),
                        requested: qty,
                        available,
                    });
                }

                let mut remaining = qty;
                while remaining > Decimal::ZERO {
                    let Some(lot) = book.lots.front_mut() else {
                        break;
                    };
                    let matched = remaining.min(lot.qty);
                    let chunk_pnl = quantize(quantize(price - lot.unit_cost) * matched);
                    book.realized_pnl = quantize(book.realized_pnl + chunk_pnl);
                    lot.qty = quantize(lot.qty - matched);
                    remaining = quantize(remaining - matched);
                    if lot.qty.is_zero() {
                        book.lots.pop_front();
                    }
                }
                self.cash = quantize(self.cash + notional);
            }
        }
        Ok(())
    }

    fn finish(
        self,
        as_of: DateTime<Utc>,
        mark_prices: &HashMap<String, Decimal>,
        events_applied: usize,
    ) -> PortfolioAccountingState {
        let zero = quantize(Decimal::ZERO);
        let mut symbols = BTreeMap::new();
        let mut inventory_cost = zero;
        let mut realized = zero;
        let mut unrealized = zero;

        for (symbol, book) in self.books {
            let mark_price = mark_prices.get(&symbol).copied().map(quantize);
            let mut qty = zero;
            let mut cost_basis = zero;
            let mut symbol_unrealized = zero;
            for lot in &book.lots {
                qty = quantize(qty + lot.qty);
                cost_basis = quantize(cost_basis + quantize(lot.qty * lot.unit_cost));
                if let Some(mark) = mark_price {
                    let lot_pnl = quantize(quantize(mark - lot.unit_cost) * lot.qty);
                    symbol_unrealized = quantize(symbol_unrealized + lot_pnl);
                }
            }
            let avg_cost = if qty.is_zero() {
                zero
            } else {
                quantize(cost_basis / qty)
            };

            inventory_cost = quantize(inventory_cost + cost_basis);
            realized = quantize(realized + book.realized_pnl);
            unrealized = quantize(unrealized + symbol_unrealized);

            symbols.insert(
                symbol,
                SymbolAccounting {
                    qty,
                    cost_basis,
                    avg_cost,
                    realized_pnl: book.realized_pnl,
                    unrealized_pnl: symbol_unrealized,
                    fees: book.fees,
                    funding_costs: book.funding_costs,
                    slippage: book.slippage,
                    mark_price,
                    lots: book.lots.into_iter().collect(),
                },
            );
        }

        let trading_capital = quantize(self.cash + inventory_cost);
        let equity = quantize(quantize(trading_capital + unrealized) + self.treasury);

        PortfolioAccountingState {
            as_of,
            cash_try: self.cash,
            treasury_try: self.treasury,
            inventory_cost_try: inventory_cost,
            trading_capital_try: trading_capital,
            realized_pnl_try: realized,
            unrealized_pnl_try: unrealized,
            fees_try: self.fees,
            funding_costs_try: self.funding_costs,
            slippage_try: self.slippage,
            transfers_net_try: self.transfers_net,
            withdrawals_try: self.withdrawals,
            equity_try: equity,
            fees_by_currency: self.fees_by_currency,
            symbols,
            events_applied,
        }
    }
}

fn malformed(event: &LedgerEvent, reason: &str) -> LedgerError {
    LedgerError::MalformedEvent {
        event_id: event.event_id.clone(),
        reason: reason.to_string(),
    }
}

fn required_amount(event: &LedgerEvent) -> Result<Decimal, LedgerError> {
    event
        .amount
        .ok_or_else(|| malformed(event, &format!("{} without amount", event.event_type)))
}

/// Keep one event per `event_id`, choosing the smallest tie-break key among duplicates
fn dedupe(events: &[LedgerEvent]) -> BTreeMap<String, LedgerEvent> {
    let mut unique: BTreeMap<String, LedgerEvent> = BTreeMap::new();
    for event in events {
        let candidate = event.quantized();
        match unique.entry(candidate.event_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                if candidate.tie_break_key() < slot.get().tie_break_key() {
                    slot.insert(candidate);
                }
            }
        }
    }
    unique
}

/// Rebuild the portfolio from the event log as of `as_of`.
///
/// Pure: the same set of events, in any order and with any duplication, yields an
/// identical state. Events are replayed by `(ts, event_id)`, lots are consumed FIFO,
/// and every intermediate amount is quantized.
pub fn recompute(
    events: &[LedgerEvent],
    as_of: DateTime<Utc>,
    mark_prices: &HashMap<String, Decimal>,
    initial_trading_capital: Decimal,
    initial_treasury: Decimal,
) -> Result<PortfolioAccountingState, LedgerError> {
    let mut ordered: Vec<LedgerEvent> = dedupe(events)
        .into_values()
        .filter(|e| e.ts <= as_of)
        .collect();
    ordered.sort_by(|a, b| (a.ts, &a.event_id).cmp(&(b.ts, &b.event_id)));

    let mut fold = LedgerFold::new(initial_trading_capital, initial_treasury);
    for event in &ordered {
        fold.apply(event)?;
    }

    tracing::debug!(
        events_in = events.len(),
        events_applied = ordered.len(),
        %as_of,
        "Ledger recomputed"
    );

    Ok(fold.finish(as_of, mark_prices, ordered.len()))
}

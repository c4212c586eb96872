use crate::accounting::{EventType, LedgerEvent, QUOTE_CURRENCY};
use crate::execution::adapter::{ExchangeAdapter, OrderAck, SubmitRequest};
use crate::execution::errors::ExchangeError;
use crate::models::OpenOrder;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl PaperOrderStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PaperOrderStatus::New => "NEW",
            PaperOrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            PaperOrderStatus::Filled => "FILLED",
            PaperOrderStatus::Cancelled => "CANCELED",
        }
    }

    fn is_open(&self) -> bool {
        matches!(self, PaperOrderStatus::New | PaperOrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone)]
struct PaperOrder {
    order: OpenOrder,
    exchange_order_id: String,
    remaining: Decimal,
    status: PaperOrderStatus,
}

impl PaperOrder {
    fn ack(&self) -> OrderAck {
        OrderAck {
            exchange_order_id: self.exchange_order_id.clone(),
            client_order_id: self.order.client_order_id.clone(),
            symbol: self.order.symbol.clone(),
            status: self.status.as_str().to_string(),
        }
    }
}

/// In-memory exchange for dry runs and tests.
///
/// Orders are keyed by client order id; resubmitting a known id returns the original
/// ack instead of creating a second order. Errors queued with `fail_next` are returned
/// by the next calls, in order.
#[derive(Debug, Default)]
pub struct PaperExchange {
    orders: Mutex<BTreeMap<String, PaperOrder>>,
    failures: Mutex<VecDeque<ExchangeError>>,
    fee_bps: Decimal,
    next_id: AtomicU64,
    next_trade: AtomicU64,
    submit_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge a TRY fee on every fill
    pub fn with_fee_bps(mut self, fee_bps: Decimal) -> Self {
        self.fee_bps = fee_bps;
        self
    }

    pub fn fail_next(&self, error: ExchangeError) {
        lock(&self.failures).push_back(error);
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Place an order directly on the book, bypassing submission
    pub fn seed_order(&self, order: OpenOrder) -> OrderAck {
        let mut orders = lock(&self.orders);
        self.insert_order(&mut orders, order)
    }

    fn insert_order(&self, orders: &mut BTreeMap<String, PaperOrder>, order: OpenOrder) -> OrderAck {
        let exchange_order_id = order
            .exchange_order_id
            .clone()
            .unwrap_or_else(|| self.allocate_id());
        let paper = PaperOrder {
            remaining: order.qty,
            order: OpenOrder {
                exchange_order_id: Some(exchange_order_id.clone()),
                ..order
            },
            exchange_order_id,
            status: PaperOrderStatus::New,
        };
        let ack = paper.ack();
        orders.insert(paper.order.client_order_id.clone(), paper);
        ack
    }

    /// Fill `qty` of an open order at its limit price, returning the ledger events it produces
    pub fn fill(
        &self,
        client_order_id: &str,
        qty: Decimal,
        ts: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>, ExchangeError> {
        let mut orders = lock(&self.orders);
        let paper = orders
            .get_mut(client_order_id)
            .filter(|o| o.status.is_open())
            .ok_or_else(|| ExchangeError::Rejected {
                code: "UNKNOWN_ORDER".to_string(),
                message: format!("no open order {client_order_id}"),
            })?;

        let matched = qty.min(paper.remaining);
        if matched <= Decimal::ZERO {
            return Ok(Vec::new());
        }
        paper.remaining -= matched;
        paper.status = if paper.remaining.is_zero() {
            PaperOrderStatus::Filled
        } else {
            PaperOrderStatus::PartiallyFilled
        };

        let trade_id = format!("T{}", self.next_trade.fetch_add(1, Ordering::SeqCst) + 1);
        let order = &paper.order;
        let mut events = vec![LedgerEvent::fill(
            format!("fill-{trade_id}"),
            ts,
            order.symbol.clone(),
            order.side,
            matched,
            order.price,
        )
        .with_reference_id(trade_id.clone())
        .with_metadata("client_order_id", order.client_order_id.clone())
        .with_metadata("exchange_order_id", paper.exchange_order_id.clone())];

        if self.fee_bps > Decimal::ZERO {
            let fee = order.price * matched * self.fee_bps / dec!(10000);
            events.push(
                LedgerEvent::cash(format!("fee-{trade_id}"), ts, EventType::Fee, fee)
                    .with_symbol(order.symbol.clone())
                    .with_fee_currency(QUOTE_CURRENCY)
                    .with_reference_id(format!("{trade_id}-fee")),
            );
        }

        tracing::debug!(
            client_order_id,
            trade_id = %trade_id,
            qty = %matched,
            price = %order.price,
            "Paper fill"
        );
        Ok(events)
    }

    fn allocate_id(&self) -> String {
        format!("P{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn take_failure(&self) -> Option<ExchangeError> {
        lock(&self.failures).pop_front()
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    async fn submit_limit_order(&self, request: &SubmitRequest) -> Result<OrderAck, ExchangeError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        if request.price <= Decimal::ZERO || request.qty <= Decimal::ZERO {
            return Err(ExchangeError::Rejected {
                code: "INVALID_ORDER".to_string(),
                message: "price and qty must be positive".to_string(),
            });
        }

        let mut orders = lock(&self.orders);
        if let Some(existing) = orders.get(&request.client_order_id) {
            return Ok(existing.ack());
        }

        let order = OpenOrder {
            symbol: request.symbol.clone(),
            side: request.side,
            price: request.price,
            qty: request.qty,
            client_order_id: request.client_order_id.clone(),
            exchange_order_id: None,
            created_at: Utc::now(),
        };
        Ok(self.insert_order(&mut orders, order))
    }

    async fn cancel_order_by_exchange_id(&self, exchange_order_id: &str) -> Result<bool, ExchangeError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        let mut orders = lock(&self.orders);
        let found = orders
            .values_mut()
            .find(|o| o.exchange_order_id == exchange_order_id && o.status.is_open());
        Ok(match found {
            Some(order) => {
                order.status = PaperOrderStatus::Cancelled;
                true
            }
            None => false,
        })
    }

    async fn find_order_by_client_id(&self, client_order_id: &str) -> Result<Option<OrderAck>, ExchangeError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(lock(&self.orders).get(client_order_id).map(PaperOrder::ack))
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(lock(&self.orders)
            .values()
            .filter(|o| o.order.symbol == symbol && o.status.is_open())
            .map(|o| OpenOrder {
                qty: o.remaining,
                ..o.order.clone()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use chrono::TimeZone;

    fn request(cid: &str) -> SubmitRequest {
        SubmitRequest {
            symbol: "BTCTRY".to_string(),
            side: Side::Buy,
            price: dec!(100),
            qty: dec!(2),
            client_order_id: cid.to_string(),
        }
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let paper = PaperExchange::new();
        let first = paper.submit_limit_order(&request("c1")).await.unwrap();
        let second = paper.submit_limit_order(&request("c1")).await.unwrap();
        assert_eq!(first.exchange_order_id, second.exchange_order_id);
        assert_eq!(paper.open_orders("BTCTRY").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fill_emits_fill_and_fee_events() {
        let paper = PaperExchange::new().with_fee_bps(dec!(10));
        paper.submit_limit_order(&request("c1")).await.unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();

        let events = paper.fill("c1", dec!(0.5), ts).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Fill);
        assert_eq!(events[0].qty, dec!(0.5));
        assert_eq!(events[1].amount, Some(dec!(0.05)));

        let open = paper.open_orders("BTCTRY").await.unwrap();
        assert_eq!(open[0].qty, dec!(1.5));
    }

    #[tokio::test]
    async fn test_cancel_unknown_returns_false() {
        let paper = PaperExchange::new();
        assert!(!paper.cancel_order_by_exchange_id("nope").await.unwrap());
        assert_eq!(paper.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_queued_failure_is_returned_once() {
        let paper = PaperExchange::new();
        paper.fail_next(ExchangeError::Connect("refused".into()));
        assert!(paper.submit_limit_order(&request("c1")).await.is_err());
        assert!(paper.submit_limit_order(&request("c1")).await.is_ok());
        assert_eq!(paper.submit_calls(), 2);
    }
}

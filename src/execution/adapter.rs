use crate::execution::errors::ExchangeError;
use crate::models::{LifecycleAction, OpenOrder, Side};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Limit order submission. Accepts `qty` or `quantity` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    #[serde(alias = "quantity")]
    pub qty: Decimal,
    pub client_order_id: String,
}

impl From<&LifecycleAction> for SubmitRequest {
    fn from(action: &LifecycleAction) -> Self {
        Self {
            symbol: action.symbol.clone(),
            side: action.side,
            price: action.price,
            qty: action.qty,
            client_order_id: action.client_order_id.clone(),
        }
    }
}

/// Exchange acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    #[serde(default)]
    pub status: String,
}

/// Exchange operations the execution layer relies on
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn submit_limit_order(&self, request: &SubmitRequest) -> Result<OrderAck, ExchangeError>;

    /// Returns whether the exchange reports the order as cancelled
    async fn cancel_order_by_exchange_id(&self, exchange_order_id: &str) -> Result<bool, ExchangeError>;

    async fn find_order_by_client_id(&self, client_order_id: &str) -> Result<Option<OrderAck>, ExchangeError>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;
}

#[async_trait]
impl<T: ExchangeAdapter + ?Sized> ExchangeAdapter for Arc<T> {
    async fn submit_limit_order(&self, request: &SubmitRequest) -> Result<OrderAck, ExchangeError> {
        (**self).submit_limit_order(request).await
    }

    async fn cancel_order_by_exchange_id(&self, exchange_order_id: &str) -> Result<bool, ExchangeError> {
        (**self).cancel_order_by_exchange_id(exchange_order_id).await
    }

    async fn find_order_by_client_id(&self, client_order_id: &str) -> Result<Option<OrderAck>, ExchangeError> {
        (**self).find_order_by_client_id(client_order_id).await
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        (**self).open_orders(symbol).await
    }
}

/// Request budget for one exchange account
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitBudget {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitBudget {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst: 10,
        }
    }
}

impl RateLimitBudget {
    fn quota(&self) -> Quota {
        let rate = NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst).unwrap_or(rate);
        Quota::per_second(rate).allow_burst(burst)
    }
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Wraps an adapter so every call waits for the shared request budget
pub struct RateLimitedAdapter<A> {
    inner: A,
    limiter: Arc<DirectRateLimiter>,
    budget: RateLimitBudget,
}

impl<A: ExchangeAdapter> RateLimitedAdapter<A> {
    pub fn new(inner: A, budget: RateLimitBudget) -> Self {
        Self {
            inner,
            limiter: Arc::new(RateLimiter::direct(budget.quota())),
            budget,
        }
    }

    pub fn budget(&self) -> RateLimitBudget {
        self.budget
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: ExchangeAdapter> ExchangeAdapter for RateLimitedAdapter<A> {
    async fn submit_limit_order(&self, request: &SubmitRequest) -> Result<OrderAck, ExchangeError> {
        self.limiter.until_ready().await;
        self.inner.submit_limit_order(request).await
    }

    async fn cancel_order_by_exchange_id(&self, exchange_order_id: &str) -> Result<bool, ExchangeError> {
        self.limiter.until_ready().await;
        self.inner.cancel_order_by_exchange_id(exchange_order_id).await
    }

    async fn find_order_by_client_id(&self, client_order_id: &str) -> Result<Option<OrderAck>, ExchangeError> {
        self.limiter.until_ready().await;
        self.inner.find_order_by_client_id(client_order_id).await
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        self.limiter.until_ready().await;
        self.inner.open_orders(symbol).await
    }
}

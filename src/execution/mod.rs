// Order execution: exchange adapters, retry/classification wrapper, idempotency keys
pub mod adapter;
pub mod backoff;
pub mod errors;
pub mod idempotency;
pub mod paper;
pub mod wrapper;

pub use adapter::{ExchangeAdapter, OrderAck, RateLimitBudget, RateLimitedAdapter, SubmitRequest};
pub use backoff::{Backoff, RetryConfig};
pub use errors::{classify, ErrorCategory, ExchangeError};
pub use idempotency::{client_order_id, dedupe_bucket};
pub use paper::PaperExchange;
pub use wrapper::{ActionResult, Classifier, ExecutionOutcome, ExecutionWrapper, UncertainResult};

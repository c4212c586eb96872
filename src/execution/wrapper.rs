use crate::execution::adapter::{ExchangeAdapter, OrderAck, SubmitRequest};
use crate::execution::backoff::{Backoff, RetryConfig};
use crate::execution::errors::{classify, ErrorCategory, ExchangeError};
use crate::instrumentation::{Instrumentation, NoopSink};
use crate::models::{ActionType, LifecycleAction};
use std::future::Future;
use std::sync::Arc;

pub type Classifier = fn(&ExchangeError) -> ErrorCategory;

const ATTEMPTS_METRIC: &str = "execution_attempts_total";
const OUTCOMES_METRIC: &str = "execution_outcomes_total";

/// The exchange may or may not have applied the action
#[derive(Debug, Clone, PartialEq)]
pub struct UncertainResult {
    pub action: String,
    pub category: ErrorCategory,
    pub error: ExchangeError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome<T> {
    Completed(T),
    /// Returned instead of an error; the caller must reconcile before resubmitting
    Uncertain(UncertainResult),
}

impl<T> ExecutionOutcome<T> {
    pub fn is_uncertain(&self) -> bool {
        matches!(self, ExecutionOutcome::Uncertain(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            ExecutionOutcome::Completed(v) => Some(v),
            ExecutionOutcome::Uncertain(_) => None,
        }
    }
}

/// Result of executing one lifecycle action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    Submitted(OrderAck),
    /// `false` when the exchange no longer knows the order
    Cancelled(bool),
    Replaced { cancelled: bool, ack: OrderAck },
}

/// Retrying, classifying front for an exchange adapter
#[derive(Clone)]
pub struct ExecutionWrapper {
    adapter: Arc<dyn ExchangeAdapter>,
    config: RetryConfig,
    classifier: Classifier,
    instrumentation: Arc<dyn Instrumentation>,
}

impl ExecutionWrapper {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, config: RetryConfig) -> Self {
        Self {
            adapter,
            config,
            classifier: classify,
            instrumentation: Arc::new(NoopSink),
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn classify(&self, error: &ExchangeError) -> ErrorCategory {
        (self.classifier)(error)
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn submit(&self, request: &SubmitRequest) -> Result<ExecutionOutcome<OrderAck>, ExchangeError> {
        let adapter = &self.adapter;
        self.run_with_retries("submit", self.config.submit_max_attempts, move || {
            adapter.submit_limit_order(request)
        })
        .await
    }

    pub async fn cancel(&self, exchange_order_id: &str) -> Result<ExecutionOutcome<bool>, ExchangeError> {
        let adapter = &self.adapter;
        self.run_with_retries("cancel", self.config.cancel_max_attempts, move || {
            adapter.cancel_order_by_exchange_id(exchange_order_id)
        })
        .await
    }

    /// Cancel by client id, looking up the exchange id first
    async fn cancel_by_client_id(
        &self,
        exchange_order_id: Option<&str>,
        client_order_id: &str,
    ) -> Result<ExecutionOutcome<bool>, ExchangeError> {
        if let Some(id) = exchange_order_id {
            return self.cancel(id).await;
        }

        let adapter = &self.adapter;
        let lookup = self
            .run_with_retries("lookup", self.config.cancel_max_attempts, move || {
                adapter.find_order_by_client_id(client_order_id)
            })
            .await?;

        match lookup {
            ExecutionOutcome::Completed(Some(ack)) => self.cancel(&ack.exchange_order_id).await,
            ExecutionOutcome::Completed(None) => {
                tracing::debug!(client_order_id, "Order to cancel not found on exchange");
                Ok(ExecutionOutcome::Completed(false))
            }
            ExecutionOutcome::Uncertain(u) => Ok(ExecutionOutcome::Uncertain(u)),
        }
    }

    /// Dispatch a planned action. REPLACE cancels the old order before submitting the new one.
    pub async fn execute_action(
        &self,
        action: &LifecycleAction,
    ) -> Result<ExecutionOutcome<ActionResult>, ExchangeError> {
        match action.action_type {
            ActionType::Submit => {
                let request = SubmitRequest::from(action);
                Ok(match self.submit(&request).await? {
                    ExecutionOutcome::Completed(ack) => {
                        ExecutionOutcome::Completed(ActionResult::Submitted(ack))
                    }
                    ExecutionOutcome::Uncertain(u) => ExecutionOutcome::Uncertain(u),
                })
            }
            ActionType::Cancel => {
                let outcome = self
                    .cancel_by_client_id(action.exchange_order_id.as_deref(), &action.client_order_id)
                    .await?;
                Ok(match outcome {
                    ExecutionOutcome::Completed(found) => {
                        ExecutionOutcome::Completed(ActionResult::Cancelled(found))
                    }
                    ExecutionOutcome::Uncertain(u) => ExecutionOutcome::Uncertain(u),
                })
            }
            ActionType::Replace => {
                let old_client_id = action
                    .replace_for_client_order_id
                    .as_deref()
                    .unwrap_or(&action.client_order_id);
                let cancelled = match self
                    .cancel_by_client_id(action.exchange_order_id.as_deref(), old_client_id)
                    .await?
                {
                    ExecutionOutcome::Completed(found) => found,
                    // Submitting now could leave two live orders
                    ExecutionOutcome::Uncertain(u) => return Ok(ExecutionOutcome::Uncertain(u)),
                };
                let request = SubmitRequest::from(action);
                Ok(match self.submit(&request).await? {
                    ExecutionOutcome::Completed(ack) => {
                        ExecutionOutcome::Completed(ActionResult::Replaced { cancelled, ack })
                    }
                    ExecutionOutcome::Uncertain(u) => ExecutionOutcome::Uncertain(u),
                })
            }
        }
    }

    async fn run_with_retries<T, F, Fut>(
        &self,
        action: &'static str,
        max_attempts: u32,
        mut call: F,
    ) -> Result<ExecutionOutcome<T>, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut backoff = Backoff::for_action(action, &self.config);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.instrumentation
                .incr_counter(ATTEMPTS_METRIC, &[("action", action)], 1);

            let error = match call().await {
                Ok(value) => {
                    self.instrumentation.incr_counter(
                        OUTCOMES_METRIC,
                        &[("action", action), ("category", "OK")],
                        1,
                    );
                    return Ok(ExecutionOutcome::Completed(value));
                }
                Err(e) => e,
            };

            let category = (self.classifier)(&error);
            self.instrumentation.incr_counter(
                OUTCOMES_METRIC,
                &[("action", action), ("category", category.as_str())],
                1,
            );

            match category {
                ErrorCategory::Uncertain => {
                    tracing::warn!(
                        "{} outcome unknown after attempt {}: {}",
                        action,
                        attempt,
                        error
                    );
                    return Ok(ExecutionOutcome::Uncertain(UncertainResult {
                        action: action.to_string(),
                        category,
                        error,
                    }));
                }
                ErrorCategory::Auth | ErrorCategory::Reject => {
                    tracing::warn!("{} failed with {}: {}", action, category, error);
                    return Err(error);
                }
                ErrorCategory::RateLimit | ErrorCategory::Transient => {
                    let computed = backoff.next_delay(attempt);
                    if attempt >= max_attempts {
                        tracing::warn!(
                            "{} failed after {} attempts ({}): {}",
                            action,
                            attempt,
                            category,
                            error
                        );
                        return Err(error);
                    }
                    let delay = error.retry_after().unwrap_or(computed);
                    tracing::warn!(
                        "{} hit {}, retrying in {:?} (attempt {}/{})",
                        action,
                        category,
                        delay,
                        attempt,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

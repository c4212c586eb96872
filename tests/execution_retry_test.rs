use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tradebot::execution::{
    Backoff, ErrorCategory, ExchangeAdapter, ExchangeError, ExecutionOutcome, ExecutionWrapper,
    OrderAck, RetryConfig, SubmitRequest,
};
use tradebot::{OpenOrder, Side};

/// Replays a fixed script of submit results, then acks everything
struct ScriptedAdapter {
    script: Mutex<VecDeque<ExchangeError>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(errors: Vec<ExchangeError>) -> Self {
        Self {
            script: Mutex::new(errors.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedAdapter {
    async fn submit_limit_order(&self, request: &SubmitRequest) -> Result<OrderAck, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(OrderAck {
            exchange_order_id: format!("X-{}", request.client_order_id),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            status: "NEW".to_string(),
        })
    }

    async fn cancel_order_by_exchange_id(&self, _exchange_order_id: &str) -> Result<bool, ExchangeError> {
        Ok(true)
    }

    async fn find_order_by_client_id(&self, _client_order_id: &str) -> Result<Option<OrderAck>, ExchangeError> {
        Ok(None)
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(Vec::new())
    }
}

/// Minimal REST adapter used to exercise HTTP error mapping
struct HttpAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAdapter {
    fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
            base_url,
        }
    }
}

#[async_trait]
impl ExchangeAdapter for HttpAdapter {
    async fn submit_limit_order(&self, request: &SubmitRequest) -> Result<OrderAck, ExchangeError> {
        let response = self
            .client
            .post(format!("{}/api/v3/order", self.base_url))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ExchangeError::from_response(response).await);
        }
        Ok(response.json::<OrderAck>().await?)
    }

    async fn cancel_order_by_exchange_id(&self, _exchange_order_id: &str) -> Result<bool, ExchangeError> {
        Err(ExchangeError::Transport("cancel not supported".to_string()))
    }

    async fn find_order_by_client_id(&self, _client_order_id: &str) -> Result<Option<OrderAck>, ExchangeError> {
        Ok(None)
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(Vec::new())
    }
}

fn request() -> SubmitRequest {
    SubmitRequest {
        symbol: "BTCTRY".to_string(),
        side: Side::Buy,
        price: dec!(2000000),
        qty: dec!(0.001),
        client_order_id: "tb-0123456789abcdef01234567".to_string(),
    }
}

fn rate_limited(retry_after: Option<Duration>) -> ExchangeError {
    ExchangeError::RateLimited {
        message: "too many requests".to_string(),
        retry_after,
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_overrides_backoff() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![rate_limited(Some(Duration::from_secs(2)))]));
    let wrapper = ExecutionWrapper::new(adapter.clone(), RetryConfig::default());

    let start = Instant::now();
    let outcome = assert_ok!(wrapper.submit(&request()).await);
    let elapsed = start.elapsed();

    assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    assert_eq!(adapter.calls(), 2);
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2010), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delay_without_retry_after() {
    let config = RetryConfig::default();
    let expected = Backoff::for_action("submit", &config).next_delay(1);

    let adapter = Arc::new(ScriptedAdapter::new(vec![rate_limited(None)]));
    let wrapper = ExecutionWrapper::new(adapter.clone(), config);

    let start = Instant::now();
    assert_ok!(wrapper.submit(&request()).await);
    let elapsed = start.elapsed();

    assert_eq!(adapter.calls(), 2);
    assert!(elapsed >= expected, "{elapsed:?} < {expected:?}");
    assert!(elapsed <= expected + Duration::from_millis(2), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_identical_failures_wait_identically() {
    let script = || {
        vec![
            ExchangeError::Server {
                status: 503,
                body: "busy".to_string(),
                retry_after: None,
            },
            ExchangeError::Connect("reset".to_string()),
        ]
    };

    let mut waits = Vec::new();
    for _ in 0..2 {
        let adapter = Arc::new(ScriptedAdapter::new(script()));
        let wrapper = ExecutionWrapper::new(adapter.clone(), RetryConfig::default());
        let start = Instant::now();
        assert_ok!(wrapper.submit(&request()).await);
        assert_eq!(adapter.calls(), 3);
        waits.push(start.elapsed());
    }

    assert_eq!(waits[0], waits[1]);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_return_last_error() {
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        rate_limited(None),
        rate_limited(None),
        rate_limited(None),
    ]));
    let wrapper = ExecutionWrapper::new(adapter.clone(), RetryConfig::default());

    let error = assert_err!(wrapper.submit(&request()).await);
    assert_eq!(wrapper.classify(&error), ErrorCategory::RateLimit);
    assert_eq!(adapter.calls(), 3);
}

#[tokio::test]
async fn test_http_429_maps_retry_after_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v3/order")
        .with_status(429)
        .with_header("retry-after", "2")
        .with_body("Too many requests")
        .create_async()
        .await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v3/order", server.url()))
        .send()
        .await
        .unwrap();
    let error = ExchangeError::from_response(response).await;

    mock.assert_async().await;
    assert_eq!(tradebot::execution::classify(&error), ErrorCategory::RateLimit);
    assert_eq!(error.retry_after(), Some(Duration::from_secs(2)));
}

#[tokio::test]
async fn test_http_rate_limit_retried_until_budget_spent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v3/order")
        .with_status(429)
        .with_header("retry-after", "0")
        .with_body("Too many requests")
        .expect(2)
        .create_async()
        .await;

    let config = RetryConfig {
        submit_max_attempts: 2,
        ..RetryConfig::default()
    };
    let wrapper = ExecutionWrapper::new(Arc::new(HttpAdapter::new(server.url())), config);

    let error = assert_err!(wrapper.submit(&request()).await);

    mock.assert_async().await;
    assert_eq!(error.retry_after(), Some(Duration::ZERO));
    assert_eq!(wrapper.classify(&error), ErrorCategory::RateLimit);
}

#[tokio::test]
async fn test_http_auth_failure_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v3/order")
        .with_status(401)
        .with_body("invalid api key")
        .expect(1)
        .create_async()
        .await;

    let wrapper = ExecutionWrapper::new(
        Arc::new(HttpAdapter::new(server.url())),
        RetryConfig::default(),
    );

    let error = assert_err!(wrapper.submit(&request()).await);

    mock.assert_async().await;
    assert!(matches!(error, ExchangeError::Auth { status: 401, .. }));
}

#[tokio::test]
async fn test_http_success_parses_ack() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v3/order")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"exchange_order_id":"884211","client_order_id":"tb-0123456789abcdef01234567","symbol":"BTCTRY","status":"NEW"}"#,
        )
        .create_async()
        .await;

    let wrapper = ExecutionWrapper::new(
        Arc::new(HttpAdapter::new(server.url())),
        RetryConfig::default(),
    );

    let outcome = assert_ok!(wrapper.submit(&request()).await);

    mock.assert_async().await;
    let ack = outcome.completed().expect("completed");
    assert_eq!(ack.exchange_order_id, "884211");
    assert_eq!(ack.symbol, "BTCTRY");
}

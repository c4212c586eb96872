use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure categories that drive retry behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    RateLimit,
    Transient,
    Auth,
    Reject,
    Uncertain,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => "RATE_LIMIT",
            ErrorCategory::Transient => "TRANSIENT",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::Reject => "REJECT",
            ErrorCategory::Uncertain => "UNCERTAIN",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::RateLimit | ErrorCategory::Transient)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by an exchange adapter
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("exchange server error {status}: {body}")]
    Server {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// Request never left the client
    #[error("connection failed: {0}")]
    Connect(String),

    /// Request may or may not have reached the exchange
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication failed ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("order rejected [{code}]: {message}")]
    Rejected { code: String, message: String },

    /// Request could not be built; nothing was sent
    #[error("invalid request: {0}")]
    Request(String),

    /// Failed after the request was handed to the transport
    #[error("transport error: {0}")]
    Transport(String),
}

impl ExchangeError {
    /// Server-requested wait, from the typed field or embedded in the message text
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExchangeError::RateLimited {
                retry_after: Some(d),
                ..
            }
            | ExchangeError::Server {
                retry_after: Some(d),
                ..
            } => Some(*d),
            ExchangeError::RateLimited { message, .. } => parse_retry_after_text(message),
            ExchangeError::Server { body, .. } => parse_retry_after_text(body),
            _ => None,
        }
    }

    /// Map a non-success HTTP response to a typed error
    pub fn from_http(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_value)
            .or_else(|| parse_retry_after_text(body));

        match status.as_u16() {
            429 | 418 => ExchangeError::RateLimited {
                message: body.to_string(),
                retry_after,
            },
            401 | 403 => ExchangeError::Auth {
                status: status.as_u16(),
                body: body.to_string(),
            },
            code if status.is_server_error() => ExchangeError::Server {
                status: code,
                body: body.to_string(),
                retry_after,
            },
            code => ExchangeError::Rejected {
                code: code.to_string(),
                message: body.to_string(),
            },
        }
    }

    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Self::from_http(status, &headers, &body)
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            ExchangeError::Request(e.to_string())
        } else if e.is_connect() {
            ExchangeError::Connect(e.to_string())
        } else if e.is_timeout() {
            ExchangeError::Timeout(e.to_string())
        } else {
            ExchangeError::Transport(e.to_string())
        }
    }
}

/// Default classifier. Pure; called exactly once per failure.
pub fn classify(error: &ExchangeError) -> ErrorCategory {
    match error {
        ExchangeError::RateLimited { .. } => ErrorCategory::RateLimit,
        ExchangeError::Server { status: 504, .. } => ErrorCategory::Uncertain,
        ExchangeError::Server { .. } => ErrorCategory::Transient,
        ExchangeError::Connect(_) => ErrorCategory::Transient,
        ExchangeError::Timeout(_) => ErrorCategory::Uncertain,
        ExchangeError::Auth { .. } => ErrorCategory::Auth,
        ExchangeError::Rejected { .. } | ExchangeError::Request(_) => ErrorCategory::Reject,
        ExchangeError::Transport(_) => ErrorCategory::Uncertain,
    }
}

/// Longest server-requested wait honoured; larger hints are capped to this
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

fn parse_retry_after_value(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let wait = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
    Some(wait.min(MAX_RETRY_AFTER))
}

/// Finds "retry-after: N" / "retry_after=N" / "Retry-After N" in free text
fn parse_retry_after_text(text: &str) -> Option<Duration> {
    let lower = text.to_ascii_lowercase();
    let idx = lower
        .find("retry-after")
        .or_else(|| lower.find("retry_after"))?;
    let rest = &lower[idx + "retry-after".len()..];
    let number: String = rest
        .trim_start_matches(|c: char| c == ':' || c == '=' || c == '"' || c.is_whitespace())
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    parse_retry_after_value(&number)
}

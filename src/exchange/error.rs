//! Typed errors for exchange operations.
//!
//! Every trait method returns one of these variants so callers can decide
//! between retry (transient), abort (permanent), and the duplicate-order
//! case that idempotent submission treats as success.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the exchange layer.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Normalized exchange failure.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Request rejected by rate limiting (HTTP 429/418).
    #[error("rate limited by exchange")]
    RateLimited { retry_after: Option<Duration> },

    /// Request exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure (DNS, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Order rejected because the account cannot cover it.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// An order with this client order id was already accepted.
    #[error("duplicate client order id: {0}")]
    DuplicateOrder(String),

    /// Exchange rejected the request with an application error code.
    #[error("exchange rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    /// Response arrived but could not be interpreted.
    #[error("unexpected exchange response: {0}")]
    Unexpected(String),
}

impl ExchangeError {
    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::RateLimited { .. }
                | ExchangeError::Timeout(_)
                | ExchangeError::Network(_)
        )
    }

    /// Whether this failure means the order actually exists on the exchange.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ExchangeError::DuplicateOrder(_))
    }

    /// Map a Binance-style `{code, msg}` body onto a typed variant.
    pub fn from_api_code(code: i64, message: String) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("duplicate") {
            ExchangeError::DuplicateOrder(message)
        } else if lower.contains("insufficient") {
            ExchangeError::InsufficientFunds(message)
        } else {
            ExchangeError::Rejected { code, message }
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured deadline on the error
            ExchangeError::Timeout(Duration::from_secs(0))
        } else if err.is_connect() || err.is_request() {
            ExchangeError::Network(err.to_string())
        } else {
            ExchangeError::Unexpected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::RateLimited { retry_after: None }.is_transient());
        assert!(ExchangeError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(ExchangeError::Network("reset".into()).is_transient());

        assert!(!ExchangeError::InsufficientFunds("balance".into()).is_transient());
        assert!(!ExchangeError::Rejected {
            code: -1100,
            message: "bad param".into()
        }
        .is_transient());
    }

    #[test]
    fn test_api_code_mapping() {
        let dup = ExchangeError::from_api_code(-2010, "Duplicate order sent.".into());
        assert!(dup.is_duplicate());

        let funds = ExchangeError::from_api_code(-2010, "Account has insufficient balance".into());
        assert!(matches!(funds, ExchangeError::InsufficientFunds(_)));

        let other = ExchangeError::from_api_code(-1121, "Invalid symbol.".into());
        assert!(matches!(other, ExchangeError::Rejected { code: -1121, .. }));
    }
}

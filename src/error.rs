//! Engine-level error taxonomy.
//!
//! Component-local failures (volatility, trend) degrade to safe defaults
//! and never surface here; these variants are the ones the trading loop
//! must decide on.

use thiserror::Error;

use crate::exchange::ExchangeError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The estimator was starved of history; callers keep the last-known
    /// value rather than failing the cycle.
    #[error("insufficient market data: have {have} samples, need {need}")]
    InsufficientData { have: usize, need: usize },

    /// Timeout / rate-limit class failure: retry with backoff.
    #[error("transient exchange failure: {0}")]
    TransientExchange(ExchangeError),

    /// Bad request / insufficient funds class failure: abort this cycle's
    /// action, log, and continue the loop.
    #[error("permanent exchange failure: {0}")]
    PermanentExchange(ExchangeError),

    /// Not a fault: the fund allocator declined the trade this cycle.
    #[error("allocation denied for {symbol}: {reason}")]
    AllocationDenied { symbol: String, reason: String },

    /// Terminal for the symbol: the guardian demands liquidation.
    #[error("stop loss triggered for {symbol}: {reason}")]
    StopLossTriggered { symbol: String, reason: String },

    /// The liquidation sell itself failed after bounded retries. Fatal for
    /// the symbol; requires operator intervention.
    #[error("liquidation failed for {symbol} after {attempts} attempts: {last_error}")]
    LiquidationFailed {
        symbol: String,
        attempts: u32,
        last_error: ExchangeError,
    },
}

impl EngineError {
    /// Classify an exchange error into the transient/permanent split.
    pub fn from_exchange(err: ExchangeError) -> Self {
        if err.is_transient() {
            EngineError::TransientExchange(err)
        } else {
            EngineError::PermanentExchange(err)
        }
    }
}

impl From<ExchangeError> for EngineError {
    fn from(err: ExchangeError) -> Self {
        EngineError::from_exchange(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exchange_error_classification() {
        let transient: EngineError = ExchangeError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(transient, EngineError::TransientExchange(_)));

        let permanent: EngineError = ExchangeError::InsufficientFunds("x".into()).into();
        assert!(matches!(permanent, EngineError::PermanentExchange(_)));
    }
}

//! Exchange capability interface consumed by the trading engine.
//!
//! The engine never talks to a concrete venue type; everything it needs
//! from an exchange is expressed here so live trading, paper trading, and
//! tests all run against the same surface.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::ExchangeResult;
use super::types::{AssetBalance, Kline, NewOrderRequest, OrderAck, Ticker};

/// Capability interface for a spot exchange.
///
/// All network methods carry a bounded timeout inside the implementation;
/// exceeding it surfaces as `ExchangeError::Timeout`, which the executor
/// treats as transient. Precision helpers are pure and must never perform
/// I/O; implementations answer from cached exchange info.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Latest traded price.
    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    /// Most recent `limit` candles for `interval` (e.g. "1d", "1h").
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> ExchangeResult<Vec<Kline>>;

    /// All non-zero asset balances for the account.
    async fn fetch_balances(&self) -> ExchangeResult<Vec<AssetBalance>>;

    /// Submit a new order. A duplicate `client_order_id` surfaces as
    /// `ExchangeError::DuplicateOrder`, which callers treat as success.
    async fn create_order(&self, order: &NewOrderRequest) -> ExchangeResult<OrderAck>;

    /// Cancel one order by exchange id.
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<()>;

    /// Cancel every open order on the symbol; returns how many were open.
    async fn cancel_open_orders(&self, symbol: &str) -> ExchangeResult<u32>;

    /// Round an order quantity down to the symbol's lot precision.
    fn amount_to_precision(&self, symbol: &str, amount: Decimal) -> Decimal;

    /// Round a price to the symbol's tick precision.
    fn price_to_precision(&self, symbol: &str, price: Decimal) -> Decimal;
}

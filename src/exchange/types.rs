//! Type definitions for exchange API payloads.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest traded price for a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    #[serde(rename = "price", with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
}

/// A single OHLCV candle.
///
/// Binance delivers klines as positional JSON arrays, so this type carries
/// no serde derives; the client builds it field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// Free/locked balance for one asset.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        }
    }
}

/// Order status as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl ExchangeOrderStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            ExchangeOrderStatus::New | ExchangeOrderStatus::PartiallyFilled
        )
    }
}

/// New order request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Required for limit orders, absent for market orders.
    pub price: Option<Decimal>,
    /// Client-assigned idempotency key.
    pub client_order_id: String,
}

/// Order acknowledgement from the exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
    pub client_order_id: String,
    pub status: ExchangeOrderStatus,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    /// Quote volume actually traded; fill price is derived from this.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub cummulative_quote_qty: Option<Decimal>,
    pub side: OrderSide,
    pub transact_time: i64,
}

impl OrderAck {
    /// Average fill price, falling back to the quoted price for unfilled
    /// or partially reported orders.
    pub fn fill_price(&self) -> Decimal {
        match self.cummulative_quote_qty {
            Some(quote) if self.executed_qty > Decimal::ZERO => quote / self.executed_qty,
            _ => self.price,
        }
    }

    pub fn transact_datetime(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.transact_time).unwrap_or_else(Utc::now)
    }
}

/// Price/quantity precision for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct SymbolPrecision {
    pub price_decimals: u32,
    pub quantity_decimals: u32,
}

impl Default for SymbolPrecision {
    fn default() -> Self {
        // Conservative fallback when exchange info is unavailable
        Self {
            price_decimals: 2,
            quantity_decimals: 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ExchangeOrderStatus::Filled.is_terminal());
        assert!(ExchangeOrderStatus::Canceled.is_terminal());
        assert!(!ExchangeOrderStatus::New.is_terminal());
        assert!(!ExchangeOrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_fill_price_prefers_executed_quote() {
        let ack = OrderAck {
            order_id: 1,
            symbol: "BNBUSDT".into(),
            client_order_id: "gh-1".into(),
            status: ExchangeOrderStatus::Filled,
            price: dec!(600),
            orig_qty: dec!(2),
            executed_qty: dec!(2),
            cummulative_quote_qty: Some(dec!(1202)),
            side: OrderSide::Buy,
            transact_time: 0,
        };
        assert_eq!(ack.fill_price(), dec!(601));
    }
}

//! Order submission and trade tracking.
//!
//! Submission is idempotent: every order gets a client-assigned key before
//! the first network attempt, transient failures retry with exponential
//! backoff, and an exchange-reported duplicate is treated as the original
//! fill. Filled trades land in a capped FIFO history and settle against
//! the fund allocator exactly once.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::FundAllocator;
use crate::error::EngineError;
use crate::exchange::{
    ExchangeApi, ExchangeError, NewOrderRequest, OrderSide, OrderType,
};

/// Domain order record; immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub status: OrderStatus,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Canceled,
    Failed,
}

/// Append-only trade history entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub profit: Decimal,
    pub order_id: String,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub order: Order,
    /// `None` when the submission deduplicated against an earlier fill.
    pub record: Option<TradeRecord>,
}

/// Per-symbol order executor and trade tracker.
pub struct OrderExecutor {
    symbol: String,
    max_attempts: u32,
    initial_backoff: Duration,
    history_cap: usize,
    allocator: Arc<FundAllocator>,

    history: VecDeque<TradeRecord>,
    recorded_keys: HashSet<String>,
    /// Most recent buy fill price; profit basis for the next sell.
    last_entry_price: Option<Decimal>,
    realized_profit: Decimal,
    session_nonce: i64,
    seq: u64,
}

impl OrderExecutor {
    pub fn new(
        symbol: impl Into<String>,
        max_attempts: u32,
        initial_backoff: Duration,
        history_cap: usize,
        allocator: Arc<FundAllocator>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            max_attempts: max_attempts.max(1),
            initial_backoff,
            history_cap: history_cap.max(1),
            allocator,
            history: VecDeque::new(),
            recorded_keys: HashSet::new(),
            last_entry_price: None,
            realized_profit: Decimal::ZERO,
            session_nonce: Utc::now().timestamp(),
            seq: 0,
        }
    }

    /// Cumulative realized profit across recorded round trips.
    pub fn realized_profit(&self) -> Decimal {
        self.realized_profit
    }

    /// Fill price of the most recent buy, if one is on the books.
    pub fn last_entry_price(&self) -> Option<Decimal> {
        self.last_entry_price
    }

    pub fn trade_count(&self) -> usize {
        self.history.len()
    }

    /// Most recent trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Vec<TradeRecord> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    fn next_key(&mut self) -> String {
        self.seq += 1;
        format!(
            "gh-{}-{}-{}",
            self.symbol.to_ascii_lowercase(),
            self.session_nonce,
            self.seq
        )
    }

    /// Submit an order with a freshly assigned idempotency key.
    ///
    /// `market_price` is the current ticker price, used as the fill price
    /// for deduplicated submissions. `quote_amount` is the capital figure
    /// settled against the allocator: the hold placed before a buy, or
    /// the proceeds credited by a sell.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &mut self,
        client: &dyn ExchangeApi,
        side: OrderSide,
        amount: Decimal,
        limit_price: Option<Decimal>,
        market_price: Decimal,
        quote_amount: Decimal,
    ) -> Result<SubmitResult, EngineError> {
        let key = self.next_key();
        self.submit_with_key(client, side, amount, limit_price, market_price, quote_amount, key)
            .await
    }

    /// Submit under a caller-provided idempotency key.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_with_key(
        &mut self,
        client: &dyn ExchangeApi,
        side: OrderSide,
        amount: Decimal,
        limit_price: Option<Decimal>,
        market_price: Decimal,
        quote_amount: Decimal,
        key: String,
    ) -> Result<SubmitResult, EngineError> {
        let attempts = self.max_attempts;
        let backoff = self.initial_backoff;
        self.submit_inner(
            client,
            side,
            amount,
            limit_price,
            market_price,
            quote_amount,
            key,
            attempts,
            backoff,
        )
        .await
    }

    /// Liquidation submission: a market sell of the whole position under
    /// its own bounded retry policy.
    pub async fn submit_liquidation(
        &mut self,
        client: &dyn ExchangeApi,
        amount: Decimal,
        market_price: Decimal,
        quote_amount: Decimal,
        attempts: u32,
        backoff: Duration,
    ) -> Result<SubmitResult, EngineError> {
        let key = self.next_key();
        self.submit_inner(
            client,
            OrderSide::Sell,
            amount,
            None,
            market_price,
            quote_amount,
            key,
            attempts.max(1),
            backoff,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn submit_inner(
        &mut self,
        client: &dyn ExchangeApi,
        side: OrderSide,
        amount: Decimal,
        limit_price: Option<Decimal>,
        market_price: Decimal,
        quote_amount: Decimal,
        key: String,
        max_attempts: u32,
        initial_backoff: Duration,
    ) -> Result<SubmitResult, EngineError> {
        let amount = client.amount_to_precision(&self.symbol, amount);
        if amount <= Decimal::ZERO {
            self.settle_failure(side, quote_amount);
            return Err(EngineError::PermanentExchange(ExchangeError::Unexpected(
                format!("order amount rounds to zero for {}", self.symbol),
            )));
        }
        let price = limit_price.map(|p| client.price_to_precision(&self.symbol, p));

        let request = NewOrderRequest {
            symbol: self.symbol.clone(),
            side,
            order_type: if price.is_some() {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            quantity: amount,
            price,
            client_order_id: key.clone(),
        };

        let mut last_error: Option<ExchangeError> = None;

        for attempt in 1..=max_attempts {
            match client.create_order(&request).await {
                Ok(ack) => {
                    let order = Order {
                        id: ack.order_id.to_string(),
                        symbol: self.symbol.clone(),
                        side,
                        price: ack.fill_price(),
                        amount: ack.executed_qty,
                        status: OrderStatus::Filled,
                        submitted_at: ack.transact_datetime(),
                    };
                    return Ok(self.settle_fill(order, &key, quote_amount));
                }
                Err(err) if err.is_duplicate() => {
                    // The original submission reached the exchange; the
                    // retry is the duplicate, not the trade
                    info!(
                        symbol = %self.symbol,
                        %key,
                        "Exchange reported duplicate order, treating as filled"
                    );
                    let order = Order {
                        id: key.clone(),
                        symbol: self.symbol.clone(),
                        side,
                        price: price.unwrap_or(market_price),
                        amount,
                        status: OrderStatus::Filled,
                        submitted_at: Utc::now(),
                    };
                    return Ok(self.settle_fill(order, &key, quote_amount));
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let backoff = initial_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        symbol = %self.symbol,
                        attempt,
                        max_attempts,
                        error = %err,
                        ?backoff,
                        "Transient order failure, backing off"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(backoff).await;
                }
                Err(err) if err.is_transient() => {
                    last_error = Some(err);
                    break;
                }
                Err(err) => {
                    warn!(symbol = %self.symbol, error = %err, "Permanent order failure");
                    self.settle_failure(side, quote_amount);
                    return Err(EngineError::PermanentExchange(err));
                }
            }
        }

        self.settle_failure(side, quote_amount);
        Err(EngineError::TransientExchange(last_error.unwrap_or(
            ExchangeError::Unexpected("retry budget exhausted".into()),
        )))
    }

    /// Book a terminal fill exactly once per idempotency key.
    fn settle_fill(&mut self, order: Order, key: &str, quote_amount: Decimal) -> SubmitResult {
        if !self.recorded_keys.insert(key.to_string()) {
            debug!(symbol = %self.symbol, key, "Fill already recorded, skipping");
            return SubmitResult {
                order,
                record: None,
            };
        }

        let profit = match order.side {
            OrderSide::Buy => {
                self.last_entry_price = Some(order.price);
                Decimal::ZERO
            }
            OrderSide::Sell => match self.last_entry_price {
                Some(entry) => (order.price - entry) * order.amount,
                None => Decimal::ZERO,
            },
        };
        self.realized_profit += profit;

        self.allocator
            .record_trade(&self.symbol, quote_amount, order.side);
        if order.side == OrderSide::Sell {
            self.allocator.record_performance(&self.symbol, profit);
        }

        let record = TradeRecord {
            timestamp: order.submitted_at,
            side: order.side,
            price: order.price,
            amount: order.amount,
            profit,
            order_id: order.id.clone(),
        };

        self.history.push_back(record.clone());
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }

        info!(
            symbol = %self.symbol,
            side = %order.side,
            price = %order.price,
            amount = %order.amount,
            %profit,
            order_id = %order.id,
            "Trade recorded"
        );

        SubmitResult {
            order,
            record: Some(record),
        }
    }

    /// Return any capital hold after a terminal failure. Failed and
    /// canceled orders never touch `record_trade`.
    fn settle_failure(&self, side: OrderSide, quote_amount: Decimal) {
        if side == OrderSide::Buy {
            self.allocator.release_hold(&self.symbol, quote_amount);
        }
    }
}

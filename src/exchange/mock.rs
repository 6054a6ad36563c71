//! In-memory exchange for paper trading and tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use crate::utils::decimal::{round_down_to_decimals, round_to_decimals};

use super::error::{ExchangeError, ExchangeResult};
use super::traits::ExchangeApi;
use super::types::{
    AssetBalance, ExchangeOrderStatus, Kline, NewOrderRequest, OrderAck, Ticker,
};

#[derive(Default)]
struct MockState {
    prices: HashMap<String, Decimal>,
    klines: HashMap<(String, String), Vec<Kline>>,
    /// asset -> free balance
    balances: HashMap<String, Decimal>,
    /// symbol -> (base asset, quote asset)
    symbol_assets: HashMap<String, (String, String)>,
    seen_client_ids: HashSet<String>,
    fills: Vec<OrderAck>,
    /// Scripted failures consumed by the next create_order calls.
    scripted_failures: VecDeque<ExchangeError>,
}

/// Simulated spot exchange.
///
/// Orders fill instantly at the scripted price (market) or at their own
/// price (limit). Balance accounting mirrors a real venue closely enough
/// for the engine's position math; failures are injectable per call to
/// exercise the retry paths.
pub struct MockExchange {
    state: Arc<RwLock<MockState>>,
    order_seq: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            order_seq: AtomicU64::new(1),
        }
    }

    /// Declare a tradable symbol and its asset pair.
    pub async fn register_symbol(&self, symbol: &str, base: &str, quote: &str) {
        self.state
            .write()
            .await
            .symbol_assets
            .insert(symbol.to_string(), (base.to_string(), quote.to_string()));
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    pub async fn set_klines(&self, symbol: &str, interval: &str, klines: Vec<Kline>) {
        self.state
            .write()
            .await
            .klines
            .insert((symbol.to_string(), interval.to_string()), klines);
    }

    pub async fn set_balance(&self, asset: &str, free: Decimal) {
        self.state
            .write()
            .await
            .balances
            .insert(asset.to_string(), free);
    }

    pub async fn balance_of(&self, asset: &str) -> Decimal {
        self.state
            .read()
            .await
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Queue a failure for the next `create_order` call.
    pub async fn fail_next_order(&self, error: ExchangeError) {
        self.state
            .write()
            .await
            .scripted_failures
            .push_back(error);
    }

    /// All filled orders so far, in submission order.
    pub async fn fills(&self) -> Vec<OrderAck> {
        self.state.read().await.fills.clone()
    }

    pub async fn fill_count(&self) -> usize {
        self.state.read().await.fills.len()
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let state = self.state.read().await;
        let price = state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::Unexpected(format!("no price scripted for {symbol}")))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: price,
        })
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> ExchangeResult<Vec<Kline>> {
        let state = self.state.read().await;
        let klines = state
            .klines
            .get(&(symbol.to_string(), interval.to_string()))
            .cloned()
            .unwrap_or_default();
        let start = klines.len().saturating_sub(limit as usize);
        Ok(klines[start..].to_vec())
    }

    async fn fetch_balances(&self) -> ExchangeResult<Vec<AssetBalance>> {
        let state = self.state.read().await;
        Ok(state
            .balances
            .iter()
            .filter(|(_, free)| **free > Decimal::ZERO)
            .map(|(asset, free)| AssetBalance {
                asset: asset.clone(),
                free: *free,
                locked: Decimal::ZERO,
            })
            .collect())
    }

    async fn create_order(&self, order: &NewOrderRequest) -> ExchangeResult<OrderAck> {
        let mut state = self.state.write().await;

        if let Some(err) = state.scripted_failures.pop_front() {
            debug!(symbol = %order.symbol, error = %err, "Mock returning scripted failure");
            return Err(err);
        }

        if !state.seen_client_ids.insert(order.client_order_id.clone()) {
            return Err(ExchangeError::DuplicateOrder(order.client_order_id.clone()));
        }

        let fill_price = match order.price {
            Some(price) => price,
            None => state.prices.get(&order.symbol).copied().ok_or_else(|| {
                ExchangeError::Unexpected(format!("no price scripted for {}", order.symbol))
            })?,
        };

        let (base, quote) = state
            .symbol_assets
            .get(&order.symbol)
            .cloned()
            .ok_or_else(|| {
                ExchangeError::Unexpected(format!("symbol {} not registered", order.symbol))
            })?;

        let quote_amount = order.quantity * fill_price;
        match order.side {
            super::types::OrderSide::Buy => {
                let have = state.balances.get(&quote).copied().unwrap_or(Decimal::ZERO);
                if have < quote_amount {
                    // Undo the idempotency reservation so a later funded retry succeeds
                    state.seen_client_ids.remove(&order.client_order_id);
                    return Err(ExchangeError::InsufficientFunds(format!(
                        "need {quote_amount} {quote}, have {have}"
                    )));
                }
                *state.balances.entry(quote).or_default() -= quote_amount;
                *state.balances.entry(base).or_default() += order.quantity;
            }
            super::types::OrderSide::Sell => {
                let have = state.balances.get(&base).copied().unwrap_or(Decimal::ZERO);
                if have < order.quantity {
                    state.seen_client_ids.remove(&order.client_order_id);
                    return Err(ExchangeError::InsufficientFunds(format!(
                        "need {} {base}, have {have}",
                        order.quantity
                    )));
                }
                *state.balances.entry(base).or_default() -= order.quantity;
                *state.balances.entry(quote).or_default() += quote_amount;
            }
        }

        let ack = OrderAck {
            order_id: self.order_seq.fetch_add(1, Ordering::SeqCst) as i64,
            symbol: order.symbol.clone(),
            client_order_id: order.client_order_id.clone(),
            status: ExchangeOrderStatus::Filled,
            price: fill_price,
            orig_qty: order.quantity,
            executed_qty: order.quantity,
            cummulative_quote_qty: Some(quote_amount),
            side: order.side,
            transact_time: Utc::now().timestamp_millis(),
        };

        state.fills.push(ack.clone());
        Ok(ack)
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: i64) -> ExchangeResult<()> {
        // Everything fills instantly, so there is never an open order
        Ok(())
    }

    async fn cancel_open_orders(&self, _symbol: &str) -> ExchangeResult<u32> {
        Ok(0)
    }

    fn amount_to_precision(&self, _symbol: &str, amount: Decimal) -> Decimal {
        round_down_to_decimals(amount, 6)
    }

    fn price_to_precision(&self, _symbol: &str, price: Decimal) -> Decimal {
        round_to_decimals(price, 2)
    }
}

/// Paper trading exchange: live market data, simulated fills.
///
/// Market-data calls pass through to the real venue while order flow is
/// routed to a `MockExchange` seeded with the venue's latest price, so the
/// whole engine can run unattended with no funds at risk.
pub struct PaperExchange<D: ExchangeApi> {
    data: D,
    sim: MockExchange,
}

impl<D: ExchangeApi> PaperExchange<D> {
    pub fn new(data: D, sim: MockExchange) -> Self {
        Self { data, sim }
    }

    pub fn sim(&self) -> &MockExchange {
        &self.sim
    }
}

#[async_trait]
impl<D: ExchangeApi> ExchangeApi for PaperExchange<D> {
    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.data.fetch_ticker(symbol).await
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> ExchangeResult<Vec<Kline>> {
        self.data.fetch_klines(symbol, interval, limit).await
    }

    async fn fetch_balances(&self) -> ExchangeResult<Vec<AssetBalance>> {
        self.sim.fetch_balances().await
    }

    async fn create_order(&self, order: &NewOrderRequest) -> ExchangeResult<OrderAck> {
        // Mark-to-market before the simulated fill
        let ticker = self.data.fetch_ticker(&order.symbol).await?;
        self.sim.set_price(&order.symbol, ticker.last_price).await;
        self.sim.create_order(order).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<()> {
        self.sim.cancel_order(symbol, order_id).await
    }

    async fn cancel_open_orders(&self, symbol: &str) -> ExchangeResult<u32> {
        self.sim.cancel_open_orders(symbol).await
    }

    fn amount_to_precision(&self, symbol: &str, amount: Decimal) -> Decimal {
        self.sim.amount_to_precision(symbol, amount)
    }

    fn price_to_precision(&self, symbol: &str, price: Decimal) -> Decimal {
        self.sim.price_to_precision(symbol, price)
    }
}

//! Per-symbol trading loop.
//!
//! One `SymbolTrader` owns everything for its symbol: durable state, the
//! grid sizer, trigger detector, the three risk gates, and the order
//! executor. Many traders run as independent tokio tasks; the fund
//! allocator is the only thing they share.
//!
//! Cycle order is fixed: snapshot → stop-loss → grid refresh → trigger →
//! risk composition → allocation → execution → persist/publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::allocator::FundAllocator;
use crate::config::{Config, SymbolConfig};
use crate::engine::{GridSignal, GridSizer, TriggerDetector};
use crate::error::EngineError;
use crate::exchange::{ExchangeApi, OrderSide};
use crate::market::VolatilityEstimator;
use crate::notify::{AlertLevel, Notifier};
use crate::persistence::StateStore;
use crate::risk::{
    PositionRiskEvaluator, PositionSnapshot, RiskState, StopLossGuardian, TrendSignal,
    TrendOverseer,
};
use crate::trader::cache::TtlCache;
use crate::trader::executor::OrderExecutor;
use crate::trader::state::{TraderState, TraderStatus};
use crate::trader::status::{StatusBoard, StatusSnapshot};
use crate::utils::decimal::{fractional_change, safe_div, to_f64};

/// Everything a symbol loop shares with the rest of the process.
pub struct SharedServices {
    pub client: Arc<dyn ExchangeApi>,
    pub allocator: Arc<FundAllocator>,
    pub store: Arc<Mutex<StateStore>>,
    pub notifier: Notifier,
    pub status_board: StatusBoard,
    pub shutdown: Arc<AtomicBool>,
}

/// The per-symbol trading loop.
pub struct SymbolTrader {
    symbol: SymbolConfig,
    config: Config,
    services: SharedServices,

    state: TraderState,
    estimator: VolatilityEstimator,
    grid: GridSizer,
    trigger: TriggerDetector,
    overseer: TrendOverseer,
    trend_cache: TtlCache<TrendSignal>,
    position_eval: PositionRiskEvaluator,
    stop_loss: StopLossGuardian,
    executor: OrderExecutor,

    consecutive_failures: u32,
    last_vol_refresh: Option<Instant>,
    cycles: u64,
    started_at: chrono::DateTime<Utc>,
}

impl SymbolTrader {
    /// Restore persisted state (or bootstrap from the current price) and
    /// assemble the loop's components.
    pub async fn initialize(
        config: Config,
        symbol: SymbolConfig,
        services: SharedServices,
    ) -> anyhow::Result<Self> {
        let persisted = {
            let store = services.store.lock().expect("store lock poisoned");
            store.load_state(&symbol.symbol)?
        };

        let state = match persisted {
            Some(state) => {
                info!(
                    symbol = %symbol.symbol,
                    base_price = %state.base_price,
                    status = %state.status,
                    "Restored trader state"
                );
                state
            }
            None => {
                let ticker = services
                    .client
                    .fetch_ticker(&symbol.symbol)
                    .await
                    .map_err(|e| anyhow::anyhow!("bootstrap ticker for {}: {e}", symbol.symbol))?;
                let state = TraderState::new(
                    symbol.symbol.clone(),
                    ticker.last_price,
                    config.grid.base_grid_pct,
                )?;
                services
                    .store
                    .lock()
                    .expect("store lock poisoned")
                    .save_state(&state)?;
                info!(
                    symbol = %symbol.symbol,
                    base_price = %state.base_price,
                    "Initialized fresh trader state"
                );
                state
            }
        };

        let trigger = match config.execution.secondary_retrace_pct {
            Some(retrace) => TriggerDetector::with_retrace(retrace),
            None => TriggerDetector::immediate(),
        };

        let executor = OrderExecutor::new(
            symbol.symbol.clone(),
            config.execution.max_attempts,
            Duration::from_millis(config.execution.initial_backoff_ms),
            config.execution.trade_history_cap,
            Arc::clone(&services.allocator),
        );

        Ok(Self {
            estimator: VolatilityEstimator::new(
                config.volatility.ewma_lambda,
                config.volatility.window,
                config.volatility.blend,
                config.volatility.min_samples,
            ),
            grid: GridSizer::new(config.grid.clone()),
            trigger,
            overseer: TrendOverseer::new(config.trend.clone()),
            trend_cache: TtlCache::new(Duration::from_secs(config.trend.cache_ttl_secs)),
            position_eval: PositionRiskEvaluator::new(
                config.risk.default_limits(),
                config.risk.position_limits.clone(),
            ),
            stop_loss: StopLossGuardian::new(
                config.risk.stop_loss_pct,
                config.risk.drawdown_pct,
            ),
            executor,
            state,
            symbol,
            config,
            services,
            consecutive_failures: 0,
            last_vol_refresh: None,
            cycles: 0,
            started_at: Utc::now(),
        })
    }

    pub fn state(&self) -> &TraderState {
        &self.state
    }

    /// Drive the loop until shutdown, stop-loss, or liquidation failure.
    pub async fn run(mut self) -> TraderState {
        if !self.state.is_running() {
            info!(
                symbol = %self.symbol.symbol,
                status = %self.state.status,
                "Trader not in running state, refusing to start"
            );
            return self.state;
        }

        info!(symbol = %self.symbol.symbol, "Trading loop started");
        let cycle_interval = Duration::from_secs(self.config.engine.cycle_interval_secs);

        loop {
            if self.services.shutdown.load(Ordering::SeqCst) {
                info!(symbol = %self.symbol.symbol, "Shutdown observed, exiting loop");
                self.persist_state();
                break;
            }
            if !self.state.is_running() {
                break;
            }

            self.services.allocator.rebalance_if_needed();

            match self.cycle().await {
                Ok(()) => {
                    self.consecutive_failures = 0;
                }
                Err(EngineError::StopLossTriggered { symbol, reason }) => {
                    warn!(%symbol, %reason, "Loop terminated by stop loss");
                    break;
                }
                Err(err @ EngineError::LiquidationFailed { .. }) => {
                    error!(symbol = %self.symbol.symbol, error = %err, "Loop halted: liquidation failed");
                    break;
                }
                Err(err) => {
                    self.consecutive_failures += 1;
                    warn!(
                        symbol = %self.symbol.symbol,
                        error = %err,
                        consecutive = self.consecutive_failures,
                        "Cycle failed"
                    );
                    if self.consecutive_failures == self.config.risk.max_consecutive_failures {
                        // Escalates but does not stop the loop; only the
                        // stop-loss path does that
                        self.services.notifier.notify(
                            AlertLevel::Warning,
                            format!("{} repeated failures", self.symbol.symbol),
                            format!(
                                "{} consecutive cycle failures, last: {err}",
                                self.consecutive_failures
                            ),
                        );
                    }
                }
            }

            tokio::time::sleep(cycle_interval).await;
        }

        info!(
            symbol = %self.symbol.symbol,
            status = %self.state.status,
            cycles = self.cycles,
            "Trading loop finished"
        );
        self.state
    }

    /// One trading cycle.
    pub async fn cycle(&mut self) -> Result<(), EngineError> {
        self.cycles += 1;

        // 1. Market + position snapshot
        let ticker = self.services.client.fetch_ticker(&self.symbol.symbol).await?;
        let price = ticker.last_price;
        let (base_amount, quote_amount) = self.fetch_position().await?;
        let snapshot = PositionSnapshot::new(base_amount, price, quote_amount);

        // 2. Stop-loss, ahead of every other gate
        let profit = self.current_profit(price, base_amount);
        if let Some(reason) = self.stop_loss.check(self.state.base_price, price, profit) {
            return Err(self.liquidate(price, base_amount, reason.to_string()).await);
        }

        // Optional drift rebase: long price moves with no fills leave the
        // grid center stale and the bands out of reach
        if let Some(threshold) = self.config.grid.auto_rebase_drift_pct {
            let drift = fractional_change(self.state.base_price, price).abs();
            if drift >= threshold {
                info!(
                    symbol = %self.symbol.symbol,
                    old_base = %self.state.base_price,
                    new_base = %price,
                    %drift,
                    "Auto-rebasing grid center after sustained drift"
                );
                let _ = self.state.rebase(price);
                self.trigger.disarm();
                self.persist_state();
            }
        }

        // 3. Periodic volatility → grid refresh
        if self.volatility_refresh_due() {
            self.refresh_grid().await;
        }

        // 4. Candidate signal
        let (bands, signal) =
            self.trigger
                .evaluate(self.state.base_price, self.state.grid_size_pct, price);

        // 5. Composed risk state
        let position_state = self.position_eval.evaluate(&self.symbol.symbol, &snapshot);
        let trend_override = self.trend_override().await;
        let risk_state = position_state.narrowed_by(trend_override);

        // 6. Execute if everything agrees
        if let Some(side) = match signal {
            GridSignal::Buy => Some(OrderSide::Buy),
            GridSignal::Sell => Some(OrderSide::Sell),
            GridSignal::None => None,
        } {
            if risk_state.permits(side) {
                match self.execute_signal(side, price, base_amount).await {
                    Ok(()) => {}
                    Err(EngineError::AllocationDenied { symbol, reason }) => {
                        // A normal skip, not a failure
                        debug!(%symbol, %reason, "Signal skipped: allocation denied");
                    }
                    Err(err) => {
                        self.publish_status(price, &snapshot, risk_state).await;
                        return Err(err);
                    }
                }
            } else {
                info!(
                    symbol = %self.symbol.symbol,
                    ?signal,
                    %risk_state,
                    %price,
                    upper = %bands.upper,
                    lower = %bands.lower,
                    "Signal suppressed by risk state"
                );
            }
        }

        // 7. Publish + persist
        self.publish_status(price, &snapshot, risk_state).await;
        self.persist_state();
        Ok(())
    }

    /// Base/quote holdings for this symbol.
    async fn fetch_position(&self) -> Result<(Decimal, Decimal), EngineError> {
        let balances = self.services.client.fetch_balances().await?;
        let mut base = Decimal::ZERO;
        let mut quote = Decimal::ZERO;
        for balance in balances {
            if balance.asset == self.symbol.base_asset {
                base = balance.total();
            } else if balance.asset == self.symbol.quote_asset {
                quote = balance.free;
            }
        }
        Ok((base, quote))
    }

    /// Realized profit plus unrealized P&L against the last entry.
    fn current_profit(&self, price: Decimal, base_amount: Decimal) -> Decimal {
        let unrealized = self
            .executor
            .last_entry_price()
            .map(|entry| (price - entry) * base_amount)
            .unwrap_or(Decimal::ZERO);
        self.executor.realized_profit() + unrealized
    }

    fn volatility_refresh_due(&self) -> bool {
        match self.last_vol_refresh {
            None => true,
            Some(at) => {
                at.elapsed() >= Duration::from_secs(self.config.engine.volatility_refresh_secs)
            }
        }
    }

    /// Re-estimate volatility and adjust the grid size.
    ///
    /// Fetch or estimation failures keep the last-known grid; they never
    /// fail the cycle.
    async fn refresh_grid(&mut self) {
        self.last_vol_refresh = Some(Instant::now());

        let vol_cfg = &self.config.volatility;
        let intraday = self
            .services
            .client
            .fetch_klines(
                &self.symbol.symbol,
                &vol_cfg.intraday_interval,
                vol_cfg.intraday_limit,
            )
            .await;
        let closes: Vec<f64> = match intraday {
            Ok(klines) if klines.len() >= self.estimator.min_samples() => {
                klines.iter().map(|k| to_f64(k.close)).collect()
            }
            // Thin intraday history: fall back to the daily window
            other => {
                if let Err(e) = &other {
                    warn!(symbol = %self.symbol.symbol, error = %e, "Intraday kline fetch failed");
                }
                match self
                    .services
                    .client
                    .fetch_klines(&self.symbol.symbol, "1d", vol_cfg.daily_limit)
                    .await
                {
                    Ok(klines) => klines.iter().map(|k| to_f64(k.close)).collect(),
                    Err(e) => {
                        warn!(
                            symbol = %self.symbol.symbol,
                            error = %e,
                            "Daily kline fetch failed, keeping last grid size"
                        );
                        return;
                    }
                }
            }
        };

        match self.estimator.estimate(&closes) {
            Ok(volatility) => {
                if let Some(new_grid) = self.grid.propose(volatility, self.state.grid_size_pct) {
                    info!(
                        symbol = %self.symbol.symbol,
                        volatility,
                        old_grid = %self.state.grid_size_pct,
                        new_grid = %new_grid,
                        "Grid size adjusted"
                    );
                    self.state.grid_size_pct = new_grid;
                    self.persist_state();
                }
            }
            Err(e) => {
                // Last-known-good grid stays in force
                warn!(
                    symbol = %self.symbol.symbol,
                    error = %e,
                    grid = %self.state.grid_size_pct,
                    "Volatility estimate unavailable, keeping last grid size"
                );
            }
        }
    }

    /// Cached trend override, recomputed on TTL expiry.
    async fn trend_override(&mut self) -> Option<RiskState> {
        if self.trend_cache.get().is_none() {
            let trend_cfg = &self.config.trend;
            let signal = match self
                .services
                .client
                .fetch_klines(
                    &self.symbol.symbol,
                    &trend_cfg.kline_interval,
                    trend_cfg.kline_limit,
                )
                .await
            {
                Ok(klines) => self.overseer.assess(&klines),
                Err(e) => {
                    warn!(
                        symbol = %self.symbol.symbol,
                        error = %e,
                        "Trend kline fetch failed, assuming sideways"
                    );
                    TrendSignal::neutral(format!("kline fetch failed: {e}"))
                }
            };
            self.trend_cache.put(signal);
        }

        let signal = self.trend_cache.get().expect("trend cache just populated");
        let override_state = self.overseer.override_state(signal);
        if let Some(narrowed) = override_state {
            info!(
                symbol = %self.symbol.symbol,
                direction = ?signal.direction,
                strength = signal.strength,
                confidence = signal.confidence,
                %narrowed,
                "Trend override active"
            );
        }
        override_state
    }

    /// Size, authorize, and submit one grid trade.
    async fn execute_signal(
        &mut self,
        side: OrderSide,
        price: Decimal,
        base_amount: Decimal,
    ) -> Result<(), EngineError> {
        let order_quote = self.config.execution.order_size_quote;
        let mut amount = safe_div(order_quote, price);

        if side == OrderSide::Sell {
            // Never sell more than is actually held
            amount = amount.min(base_amount);
            if amount <= Decimal::ZERO {
                debug!(symbol = %self.symbol.symbol, "Sell signal with no inventory, skipping");
                return Ok(());
            }
        }

        let quote_amount = amount * price;

        if side == OrderSide::Buy {
            self.services
                .allocator
                .begin_trade(&self.symbol.symbol, quote_amount)?;
        }

        let result = self
            .executor
            .submit(
                self.services.client.as_ref(),
                side,
                amount,
                None,
                price,
                quote_amount,
            )
            .await?;

        // The grid re-centers on the fill
        self.state
            .apply_fill(result.order.price, result.order.submitted_at);
        self.trigger.disarm();
        self.persist_state();

        if let Some(record) = &result.record {
            let store = self.services.store.lock().expect("store lock poisoned");
            if let Err(e) = store.record_trade(&self.symbol.symbol, record) {
                warn!(symbol = %self.symbol.symbol, error = %e, "Failed to persist trade record");
            }
        }

        info!(
            symbol = %self.symbol.symbol,
            side = %side,
            price = %result.order.price,
            amount = %result.order.amount,
            new_base = %self.state.base_price,
            "Grid trade executed"
        );
        Ok(())
    }

    /// Full liquidation path. Returns the terminal error for the loop.
    async fn liquidate(
        &mut self,
        price: Decimal,
        base_amount: Decimal,
        reason: String,
    ) -> EngineError {
        let symbol = self.symbol.symbol.clone();

        self.services.notifier.notify(
            AlertLevel::Error,
            format!("{symbol} stop loss"),
            format!("Liquidating: {reason}"),
        );

        if let Err(e) = self.services.client.cancel_open_orders(&symbol).await {
            warn!(%symbol, error = %e, "Failed to cancel open orders before liquidation");
        }

        if base_amount > Decimal::ZERO {
            let quote_amount = base_amount * price;
            match self
                .executor
                .submit_liquidation(
                    self.services.client.as_ref(),
                    base_amount,
                    price,
                    quote_amount,
                    self.config.risk.liquidation_attempts,
                    Duration::from_millis(self.config.risk.liquidation_backoff_ms),
                )
                .await
            {
                Ok(result) => {
                    if let Some(record) = &result.record {
                        let store = self.services.store.lock().expect("store lock poisoned");
                        let _ = store.record_trade(&symbol, record);
                    }
                    info!(
                        %symbol,
                        amount = %base_amount,
                        price = %result.order.price,
                        "Position liquidated"
                    );
                }
                Err(err) => {
                    // The one deliberately unrecoverable path: a position
                    // we cannot flatten under a failing connection
                    let last_error = match err {
                        EngineError::TransientExchange(e) | EngineError::PermanentExchange(e) => e,
                        other => {
                            crate::exchange::ExchangeError::Unexpected(other.to_string())
                        }
                    };
                    self.state.status = TraderStatus::Stopped;
                    self.persist_state();
                    self.services.notifier.notify(
                        AlertLevel::Critical,
                        format!("{symbol} liquidation FAILED"),
                        format!(
                            "Stop loss fired ({reason}) but the liquidation sell failed after {} attempts: {last_error}. \
                             Manual intervention required.",
                            self.config.risk.liquidation_attempts
                        ),
                    );
                    return EngineError::LiquidationFailed {
                        symbol,
                        attempts: self.config.risk.liquidation_attempts,
                        last_error,
                    };
                }
            }
        }

        self.state.status = TraderStatus::Liquidated;
        self.persist_state();
        EngineError::StopLossTriggered { symbol, reason }
    }

    fn persist_state(&self) {
        let store = self.services.store.lock().expect("store lock poisoned");
        if let Err(e) = store.save_state(&self.state) {
            warn!(
                symbol = %self.symbol.symbol,
                error = %e,
                "Failed to persist trader state"
            );
        }
    }

    async fn publish_status(
        &self,
        price: Decimal,
        snapshot: &PositionSnapshot,
        risk_state: RiskState,
    ) {
        self.services
            .status_board
            .publish(StatusSnapshot {
                symbol: self.symbol.symbol.clone(),
                status: self.state.status,
                base_price: self.state.base_price,
                current_price: price,
                grid_size_pct: self.state.grid_size_pct,
                risk_state,
                position_ratio: snapshot.position_ratio,
                realized_profit: self.executor.realized_profit(),
                recent_trades: self.executor.recent_trades(10),
                cycles: self.cycles,
                started_at: self.started_at,
                refreshed_at: Utc::now(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocationStrategy;
    use crate::exchange::{Kline, MockExchange};
    use rust_decimal_macros::dec;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.symbols = vec![SymbolConfig {
            symbol: "BNBUSDT".to_string(),
            base_asset: "BNB".to_string(),
            quote_asset: "USDT".to_string(),
        }];
        config.engine.cycle_interval_secs = 0;
        config.execution.initial_backoff_ms = 1;
        config.execution.order_size_quote = dec!(600);
        config.risk.stop_loss_pct = dec!(0.15);
        config
    }

    async fn funded_mock(price: Decimal) -> Arc<MockExchange> {
        let mock = Arc::new(MockExchange::new());
        mock.register_symbol("BNBUSDT", "BNB", "USDT").await;
        mock.set_price("BNBUSDT", price).await;
        mock.set_balance("USDT", dec!(5000)).await;
        mock.set_balance("BNB", dec!(5)).await;
        mock
    }

    fn services(mock: Arc<MockExchange>, config: &Config) -> SharedServices {
        SharedServices {
            client: mock,
            allocator: Arc::new(
                FundAllocator::new(
                    config.capital.total_capital,
                    config.capital.max_global_usage,
                    AllocationStrategy::Equal,
                    Duration::from_secs(3600),
                    &["BNBUSDT".to_string()],
                )
                .unwrap(),
            ),
            store: Arc::new(Mutex::new(StateStore::in_memory().unwrap())),
            notifier: Notifier::disconnected(),
            status_board: StatusBoard::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn trader(config: Config, mock: Arc<MockExchange>) -> SymbolTrader {
        let symbol = config.symbols[0].clone();
        let services = services(Arc::clone(&mock), &config);
        SymbolTrader::initialize(config, symbol, services)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_uses_current_price() {
        let mock = funded_mock(dec!(600)).await;
        let trader = trader(test_config(), mock).await;

        assert_eq!(trader.state().base_price, dec!(600));
        assert_eq!(trader.state().grid_size_pct, dec!(0.02));
        assert_eq!(trader.state().status, TraderStatus::Running);
    }

    #[tokio::test]
    async fn test_sell_signal_executes_and_recenters() {
        let mock = funded_mock(dec!(600)).await;
        let mut trader = trader(test_config(), Arc::clone(&mock)).await;

        // Price above the upper band (606): sell fires
        mock.set_price("BNBUSDT", dec!(607)).await;
        trader.cycle().await.unwrap();

        let fills = mock.fills().await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, OrderSide::Sell);

        // Grid re-centers on the fill
        assert_eq!(trader.state().base_price, dec!(607));
        assert_eq!(trader.state().last_trade_price, Some(dec!(607)));
    }

    #[tokio::test]
    async fn test_price_inside_band_does_nothing() {
        let mock = funded_mock(dec!(600)).await;
        let mut trader = trader(test_config(), Arc::clone(&mock)).await;

        mock.set_price("BNBUSDT", dec!(602)).await;
        trader.cycle().await.unwrap();

        assert!(mock.fills().await.is_empty());
        assert_eq!(trader.state().base_price, dec!(600));
    }

    #[tokio::test]
    async fn test_buy_suppressed_when_over_position_limit() {
        let mock = funded_mock(dec!(600)).await;
        // Base holdings dominate: ratio = 5*593 / (5*593 + 500) ≈ 0.86
        mock.set_balance("USDT", dec!(500)).await;
        let mut config = test_config();
        config.risk.max_position_ratio = dec!(0.80);
        let mut trader = trader(config, Arc::clone(&mock)).await;

        // Buy signal at the lower band, but ALLOW_SELL_ONLY suppresses it
        mock.set_price("BNBUSDT", dec!(593)).await;
        trader.cycle().await.unwrap();
        assert!(mock.fills().await.is_empty());

        // A sell signal still goes through
        mock.set_price("BNBUSDT", dec!(607)).await;
        trader.cycle().await.unwrap();
        let fills = mock.fills().await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_buy_suppressed_by_strong_downtrend() {
        let mock = funded_mock(dec!(600)).await;
        let config = test_config();

        // Strong downtrend in the trend klines
        let closes: Vec<Kline> = (0..80)
            .map(|i| {
                let c = Decimal::from(800 - i * 3);
                Kline {
                    open_time: i,
                    open: c,
                    high: c + dec!(1),
                    low: c - dec!(1),
                    close: c,
                    volume: Decimal::ONE,
                    close_time: i,
                }
            })
            .collect();
        mock.set_klines("BNBUSDT", &config.trend.kline_interval, closes)
            .await;

        let mut trader = trader(config, Arc::clone(&mock)).await;

        mock.set_price("BNBUSDT", dec!(593)).await;
        trader.cycle().await.unwrap();

        // ALLOW_ALL narrowed to ALLOW_SELL_ONLY: the buy never reaches
        // the exchange
        assert!(mock.fills().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_loss_liquidates_and_stops_loop() {
        let mock = funded_mock(dec!(600)).await;
        let mut trader = trader(test_config(), Arc::clone(&mock)).await;

        // base 600, stop 15% => floor 510; gap straight through it
        mock.set_price("BNBUSDT", dec!(505)).await;
        let err = trader.cycle().await.unwrap_err();
        assert!(matches!(err, EngineError::StopLossTriggered { .. }));

        // The entire position was market-sold
        let fills = mock.fills().await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, OrderSide::Sell);
        assert_eq!(fills[0].orig_qty, dec!(5));
        assert_eq!(mock.balance_of("BNB").await, Decimal::ZERO);

        // Terminal status is persisted and the loop refuses to restart
        assert_eq!(trader.state().status, TraderStatus::Liquidated);
        let final_state = trader.run().await;
        assert_eq!(final_state.status, TraderStatus::Liquidated);
        // No further orders after liquidation, buy signal or not
        assert_eq!(mock.fills().await.len(), 1);
    }

    #[tokio::test]
    async fn test_liquidation_failure_is_fatal_and_flagged() {
        let mock = funded_mock(dec!(600)).await;
        let mut config = test_config();
        config.risk.liquidation_attempts = 2;
        config.risk.liquidation_backoff_ms = 1;
        let mut trader = trader(config, Arc::clone(&mock)).await;

        // Every liquidation attempt times out
        for _ in 0..2 {
            mock.fail_next_order(crate::exchange::ExchangeError::Timeout(
                Duration::from_secs(1),
            ))
            .await;
        }

        mock.set_price("BNBUSDT", dec!(505)).await;
        let err = trader.cycle().await.unwrap_err();
        assert!(matches!(err, EngineError::LiquidationFailed { attempts: 2, .. }));
        assert_eq!(trader.state().status, TraderStatus::Stopped);
    }

    #[tokio::test]
    async fn test_allocation_denial_skips_without_failing() {
        let mock = funded_mock(dec!(600)).await;
        let mut config = test_config();
        // A budget far below one order: every buy is denied
        config.capital.total_capital = dec!(100);
        let symbol = config.symbols[0].clone();
        let mut services = services(Arc::clone(&mock), &config);
        services.allocator = Arc::new(
            FundAllocator::new(
                dec!(100),
                dec!(0.95),
                AllocationStrategy::Equal,
                Duration::from_secs(3600),
                &["BNBUSDT".to_string()],
            )
            .unwrap(),
        );
        let mut trader = SymbolTrader::initialize(config, symbol, services)
            .await
            .unwrap();

        mock.set_price("BNBUSDT", dec!(593)).await;
        // The cycle succeeds; the denied trade is a skip, not an error
        trader.cycle().await.unwrap();
        assert!(mock.fills().await.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_order_failure_keeps_running() {
        let mock = funded_mock(dec!(600)).await;
        let mut trader = trader(test_config(), Arc::clone(&mock)).await;

        mock.fail_next_order(crate::exchange::ExchangeError::Rejected {
            code: -1013,
            message: "MIN_NOTIONAL".into(),
        })
        .await;

        mock.set_price("BNBUSDT", dec!(607)).await;
        let err = trader.cycle().await.unwrap_err();
        assert!(matches!(err, EngineError::PermanentExchange(_)));

        // The loop state survives; the next cycle trades normally
        assert_eq!(trader.state().status, TraderStatus::Running);
        trader.cycle().await.unwrap();
        assert_eq!(mock.fills().await.len(), 1);
    }

    #[tokio::test]
    async fn test_ticker_failure_surfaces_as_transient() {
        use crate::exchange::{ExchangeError, MockExchangeApi, Ticker};

        let mut mock = MockExchangeApi::new();
        let mut seq = mockall::Sequence::new();
        // Bootstrap ticker succeeds, the first cycle's refresh times out
        mock.expect_fetch_ticker()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(Ticker {
                    symbol: "BNBUSDT".into(),
                    last_price: dec!(600),
                })
            });
        mock.expect_fetch_ticker()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ExchangeError::Timeout(Duration::from_secs(10))));

        let config = test_config();
        let symbol = config.symbols[0].clone();
        let services = SharedServices {
            client: Arc::new(mock),
            allocator: Arc::new(
                FundAllocator::new(
                    dec!(10_000),
                    dec!(0.95),
                    AllocationStrategy::Equal,
                    Duration::from_secs(3600),
                    &["BNBUSDT".to_string()],
                )
                .unwrap(),
            ),
            store: Arc::new(Mutex::new(StateStore::in_memory().unwrap())),
            notifier: Notifier::disconnected(),
            status_board: StatusBoard::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        };

        let mut trader = SymbolTrader::initialize(config, symbol, services)
            .await
            .unwrap();
        let err = trader.cycle().await.unwrap_err();
        assert!(matches!(err, EngineError::TransientExchange(_)));
        // The loop state is untouched by a snapshot failure
        assert_eq!(trader.state().status, TraderStatus::Running);
    }

    #[tokio::test]
    async fn test_status_snapshot_published_each_cycle() {
        let mock = funded_mock(dec!(600)).await;
        let mut trader = trader(test_config(), Arc::clone(&mock)).await;
        let board = trader.services.status_board.clone();

        mock.set_price("BNBUSDT", dec!(602)).await;
        trader.cycle().await.unwrap();

        let snapshot = board.snapshot("BNBUSDT").await.unwrap();
        assert_eq!(snapshot.current_price, dec!(602));
        assert_eq!(snapshot.base_price, dec!(600));
        assert_eq!(snapshot.cycles, 1);
        assert_eq!(snapshot.risk_state, RiskState::AllowAll);
    }

    #[tokio::test]
    async fn test_auto_rebase_recenters_after_drift() {
        let mock = funded_mock(dec!(600)).await;
        // Hold position limits wide open so the drift itself is the only
        // thing under test, then block trading via allocation denial
        let mut config = test_config();
        config.grid.auto_rebase_drift_pct = Some(dec!(0.05));
        config.risk.max_position_ratio = dec!(0.999);
        let symbol = config.symbols[0].clone();
        let mut services = services(Arc::clone(&mock), &config);
        services.allocator = Arc::new(
            FundAllocator::new(
                dec!(1),
                dec!(0.95),
                AllocationStrategy::Equal,
                Duration::from_secs(3600),
                &["BNBUSDT".to_string()],
            )
            .unwrap(),
        );
        let mut trader = SymbolTrader::initialize(config, symbol, services)
            .await
            .unwrap();

        // 7% above base: past the 5% drift threshold
        mock.set_price("BNBUSDT", dec!(642)).await;
        trader.cycle().await.unwrap();

        assert_eq!(trader.state().base_price, dec!(642));
        // Rebase is not a trade
        assert_eq!(trader.state().last_trade_price, None);
    }

    #[tokio::test]
    async fn test_persisted_state_restored_on_restart() {
        let mock = funded_mock(dec!(600)).await;
        let config = test_config();
        let symbol = config.symbols[0].clone();
        let shared = services(Arc::clone(&mock), &config);
        let store = Arc::clone(&shared.store);

        {
            let mut trader =
                SymbolTrader::initialize(config.clone(), symbol.clone(), shared).await.unwrap();
            mock.set_price("BNBUSDT", dec!(607)).await;
            trader.cycle().await.unwrap();
            assert_eq!(trader.state().base_price, dec!(607));
        }

        // A new loop over the same store resumes from the persisted base
        let services2 = SharedServices {
            client: Arc::clone(&mock) as Arc<dyn ExchangeApi>,
            allocator: Arc::new(
                FundAllocator::new(
                    dec!(10_000),
                    dec!(0.95),
                    AllocationStrategy::Equal,
                    Duration::from_secs(3600),
                    &["BNBUSDT".to_string()],
                )
                .unwrap(),
            ),
            store,
            notifier: Notifier::disconnected(),
            status_board: StatusBoard::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        let restarted = SymbolTrader::initialize(config, symbol, services2)
            .await
            .unwrap();
        assert_eq!(restarted.state().base_price, dec!(607));
        assert_eq!(restarted.state().last_trade_price, Some(dec!(607)));
    }
}

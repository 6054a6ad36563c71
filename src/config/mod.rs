//! Configuration management for the grid harvester.
//!
//! Loads settings from a `config.toml` file layered under `GH__`-prefixed
//! environment variables. Range invariants, including every per-symbol
//! position-limit override, are validated once at load time.

use std::collections::HashMap;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::allocator::AllocationStrategy;
use crate::risk::PositionLimits;
use crate::utils::decimal::to_f64;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Exchange credentials and mode
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Loop pacing and storage
    #[serde(default)]
    pub engine: EngineConfig,
    /// Grid sizing parameters
    #[serde(default)]
    pub grid: GridConfig,
    /// Volatility estimator parameters
    #[serde(default)]
    pub volatility: VolatilityConfig,
    /// Risk limits and stop-loss thresholds
    #[serde(default)]
    pub risk: RiskConfig,
    /// Trend overseer parameters
    #[serde(default)]
    pub trend: TrendConfig,
    /// Shared capital budgets
    #[serde(default)]
    pub capital: CapitalConfig,
    /// Order execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Outbound alerting
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Symbols to trade
    #[serde(default = "default_symbols")]
    pub symbols: Vec<SymbolConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
    /// Paper trading: live market data, simulated fills
    #[serde(default = "default_paper")]
    pub paper: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between trading cycles
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Seconds between volatility/grid refreshes
    #[serde(default = "default_volatility_refresh_secs")]
    pub volatility_refresh_secs: u64,
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Grid percentage at the volatility center point
    #[serde(default = "default_base_grid_pct")]
    pub base_grid_pct: Decimal,
    #[serde(default = "default_min_grid_pct")]
    pub min_grid_pct: Decimal,
    #[serde(default = "default_max_grid_pct")]
    pub max_grid_pct: Decimal,
    /// Slope of the volatility → grid mapping
    #[serde(default = "default_volatility_sensitivity")]
    pub volatility_sensitivity: f64,
    /// Volatility level that maps to the base grid
    #[serde(default = "default_center_volatility")]
    pub center_volatility: f64,
    /// Adjustments below this step are suppressed
    #[serde(default = "default_min_adjust_step")]
    pub min_adjust_step: Decimal,
    /// Volatility samples averaged before mapping
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    /// Re-center the grid when price drifts this far from the base with
    /// no fill (off by default, matching the original behavior)
    #[serde(default)]
    pub auto_rebase_drift_pct: Option<Decimal>,
}

impl GridConfig {
    pub fn base_grid_pct_f64(&self) -> f64 {
        to_f64(self.base_grid_pct)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    /// EWMA decay factor
    #[serde(default = "default_ewma_lambda")]
    pub ewma_lambda: f64,
    /// Rolling window length in samples
    #[serde(default = "default_vol_window")]
    pub window: usize,
    /// Weight of the EWMA leg in the blend
    #[serde(default = "default_vol_blend")]
    pub blend: f64,
    /// Minimum price samples before an estimate is produced
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Daily candle history depth
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u16,
    /// Intraday interval and history depth
    #[serde(default = "default_intraday_interval")]
    pub intraday_interval: String,
    #[serde(default = "default_intraday_limit")]
    pub intraday_limit: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Global default position-ratio floor
    #[serde(default = "default_min_position_ratio")]
    pub min_position_ratio: Decimal,
    /// Global default position-ratio ceiling
    #[serde(default = "default_max_position_ratio")]
    pub max_position_ratio: Decimal,
    /// Per-symbol overrides of the ratio bounds
    #[serde(default)]
    pub position_limits: HashMap<String, PositionLimits>,
    /// Hard price stop as a fraction below the base price
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Profit drawdown fraction that forces liquidation
    #[serde(default = "default_drawdown_pct")]
    pub drawdown_pct: Decimal,
    /// Consecutive execution failures before a warning alert
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Bounded attempts for the liquidation sell
    #[serde(default = "default_liquidation_attempts")]
    pub liquidation_attempts: u32,
    #[serde(default = "default_liquidation_backoff_ms")]
    pub liquidation_backoff_ms: u64,
}

impl RiskConfig {
    pub fn default_limits(&self) -> PositionLimits {
        PositionLimits {
            min_ratio: self.min_position_ratio,
            max_ratio: self.max_position_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,
    /// ADX above this counts as a strong trend
    #[serde(default = "default_strong_adx")]
    pub strong_adx: f64,
    /// Confidence required before the override applies
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Trend signal TTL
    #[serde(default = "default_trend_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_trend_interval")]
    pub kline_interval: String,
    #[serde(default = "default_trend_limit")]
    pub kline_limit: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Total capital shared across all symbols, in quote units
    #[serde(default = "default_total_capital")]
    pub total_capital: Decimal,
    /// Fraction of total capital that may ever be in use at once
    #[serde(default = "default_max_global_usage")]
    pub max_global_usage: Decimal,
    /// equal | weighted | dynamic
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Per-symbol weights for the weighted strategy; must sum to 1
    #[serde(default)]
    pub weights: HashMap<String, Decimal>,
    /// Dynamic strategy rebalance period
    #[serde(default = "default_rebalance_interval_secs")]
    pub rebalance_interval_secs: u64,
}

impl CapitalConfig {
    pub fn allocation_strategy(&self) -> Result<AllocationStrategy> {
        match self.strategy.as_str() {
            "equal" => Ok(AllocationStrategy::Equal),
            "weighted" => Ok(AllocationStrategy::Weighted(self.weights.clone())),
            "dynamic" => Ok(AllocationStrategy::Dynamic),
            other => anyhow::bail!("unknown allocation strategy '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Bounded retry attempts per order
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff step; doubles per attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Quote value of one grid trade
    #[serde(default = "default_order_size_quote")]
    pub order_size_quote: Decimal,
    /// FIFO cap on the in-memory trade history
    #[serde(default = "default_trade_history_cap")]
    pub trade_history_cap: usize,
    /// Retrace fraction for pullback/rebound triggers (unset = immediate)
    #[serde(default)]
    pub secondary_retrace_pct: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Optional webhook receiving alert JSON
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

// Default value functions

fn default_paper() -> bool {
    true
}

fn default_cycle_interval_secs() -> u64 {
    10
}

fn default_volatility_refresh_secs() -> u64 {
    900
}

fn default_db_path() -> String {
    "data/harvester.db".to_string()
}

fn default_base_grid_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_min_grid_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_max_grid_pct() -> Decimal {
    Decimal::new(4, 2) // 0.04
}

fn default_volatility_sensitivity() -> f64 {
    0.5
}

fn default_center_volatility() -> f64 {
    0.02
}

fn default_min_adjust_step() -> Decimal {
    Decimal::new(1, 3) // 0.001 = 0.1 percentage points
}

fn default_smoothing_window() -> usize {
    5
}

fn default_ewma_lambda() -> f64 {
    0.94
}

fn default_vol_window() -> usize {
    20
}

fn default_vol_blend() -> f64 {
    0.6
}

fn default_min_samples() -> usize {
    10
}

fn default_daily_limit() -> u16 {
    30
}

fn default_intraday_interval() -> String {
    "1h".to_string()
}

fn default_intraday_limit() -> u16 {
    48
}

fn default_min_position_ratio() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_max_position_ratio() -> Decimal {
    Decimal::new(80, 2) // 0.80
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(15, 2) // 0.15
}

fn default_drawdown_pct() -> Decimal {
    Decimal::new(40, 2) // 0.40
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_liquidation_attempts() -> u32 {
    5
}

fn default_liquidation_backoff_ms() -> u64 {
    1000
}

fn default_ema_fast() -> usize {
    8
}

fn default_ema_slow() -> usize {
    21
}

fn default_adx_period() -> usize {
    14
}

fn default_strong_adx() -> f64 {
    30.0
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_trend_ttl_secs() -> u64 {
    300
}

fn default_trend_interval() -> String {
    "1h".to_string()
}

fn default_trend_limit() -> u16 {
    100
}

fn default_total_capital() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_max_global_usage() -> Decimal {
    Decimal::new(95, 2) // 0.95
}

fn default_strategy() -> String {
    "equal".to_string()
}

fn default_rebalance_interval_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_order_size_quote() -> Decimal {
    Decimal::new(100, 0)
}

fn default_trade_history_cap() -> usize {
    200
}

fn default_symbols() -> Vec<SymbolConfig> {
    vec![SymbolConfig {
        symbol: "BNBUSDT".to_string(),
        base_asset: "BNB".to_string(),
        quote_asset: "USDT".to_string(),
    }]
}

impl Config {
    /// Load configuration from `config.toml` and environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("GH"))
            .build()
            .context("failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate range invariants across all sections.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.symbols.is_empty(), "at least one symbol is required");

        anyhow::ensure!(
            self.grid.min_grid_pct > Decimal::ZERO
                && self.grid.min_grid_pct < self.grid.max_grid_pct,
            "grid bounds must satisfy 0 < min < max"
        );
        anyhow::ensure!(
            self.grid.base_grid_pct >= self.grid.min_grid_pct
                && self.grid.base_grid_pct <= self.grid.max_grid_pct,
            "base_grid_pct must lie within [min_grid_pct, max_grid_pct]"
        );

        anyhow::ensure!(
            (0.0..=1.0).contains(&self.volatility.blend),
            "volatility blend must be in [0,1]"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.volatility.ewma_lambda),
            "ewma_lambda must be in [0,1)"
        );

        self.risk
            .default_limits()
            .validate()
            .context("global position limits invalid")?;
        for (symbol, limits) in &self.risk.position_limits {
            limits
                .validate()
                .with_context(|| format!("position limit override for {symbol} invalid"))?;
        }
        anyhow::ensure!(
            self.risk.stop_loss_pct > Decimal::ZERO && self.risk.stop_loss_pct < Decimal::ONE,
            "stop_loss_pct must be in (0,1)"
        );
        anyhow::ensure!(
            self.risk.drawdown_pct > Decimal::ZERO && self.risk.drawdown_pct <= Decimal::ONE,
            "drawdown_pct must be in (0,1]"
        );
        anyhow::ensure!(
            self.risk.liquidation_attempts >= 1,
            "liquidation_attempts must be at least 1"
        );

        anyhow::ensure!(
            self.trend.ema_fast < self.trend.ema_slow,
            "ema_fast must be shorter than ema_slow"
        );

        anyhow::ensure!(
            self.capital.total_capital > Decimal::ZERO,
            "total_capital must be positive"
        );
        anyhow::ensure!(
            self.capital.max_global_usage > Decimal::ZERO
                && self.capital.max_global_usage <= Decimal::ONE,
            "max_global_usage must be in (0,1]"
        );
        self.capital
            .allocation_strategy()
            .context("capital strategy invalid")?;

        anyhow::ensure!(
            self.execution.order_size_quote > Decimal::ZERO,
            "order_size_quote must be positive"
        );
        anyhow::ensure!(
            self.execution.max_attempts >= 1,
            "max_attempts must be at least 1"
        );
        if let Some(retrace) = self.execution.secondary_retrace_pct {
            anyhow::ensure!(
                retrace > Decimal::ZERO && retrace < Decimal::ONE,
                "secondary_retrace_pct must be in (0,1)"
            );
        }

        Ok(())
    }

    pub fn symbol_names(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.symbol.clone()).collect()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            volatility_refresh_secs: default_volatility_refresh_secs(),
            db_path: default_db_path(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            base_grid_pct: default_base_grid_pct(),
            min_grid_pct: default_min_grid_pct(),
            max_grid_pct: default_max_grid_pct(),
            volatility_sensitivity: default_volatility_sensitivity(),
            center_volatility: default_center_volatility(),
            min_adjust_step: default_min_adjust_step(),
            smoothing_window: default_smoothing_window(),
            auto_rebase_drift_pct: None,
        }
    }
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            ewma_lambda: default_ewma_lambda(),
            window: default_vol_window(),
            blend: default_vol_blend(),
            min_samples: default_min_samples(),
            daily_limit: default_daily_limit(),
            intraday_interval: default_intraday_interval(),
            intraday_limit: default_intraday_limit(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_position_ratio: default_min_position_ratio(),
            max_position_ratio: default_max_position_ratio(),
            position_limits: HashMap::new(),
            stop_loss_pct: default_stop_loss_pct(),
            drawdown_pct: default_drawdown_pct(),
            max_consecutive_failures: default_max_consecutive_failures(),
            liquidation_attempts: default_liquidation_attempts(),
            liquidation_backoff_ms: default_liquidation_backoff_ms(),
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            adx_period: default_adx_period(),
            strong_adx: default_strong_adx(),
            min_confidence: default_min_confidence(),
            cache_ttl_secs: default_trend_ttl_secs(),
            kline_interval: default_trend_interval(),
            kline_limit: default_trend_limit(),
        }
    }
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            total_capital: default_total_capital(),
            max_global_usage: default_max_global_usage(),
            strategy: default_strategy(),
            weights: HashMap::new(),
            rebalance_interval_secs: default_rebalance_interval_secs(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            order_size_quote: default_order_size_quote(),
            trade_history_cap: default_trade_history_cap(),
            secondary_retrace_pct: None,
        }
    }
}

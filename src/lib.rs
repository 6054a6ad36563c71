//! # Grid Harvester
//!
//! A volatility-adaptive grid trading engine with layered risk controls.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and load-time validation
//! - `exchange`: Exchange capability trait, REST client, paper/mock venues
//! - `market`: Volatility estimation and trend indicators
//! - `engine`: Grid sizing and band trigger detection
//! - `risk`: Position limits, trend override, and stop-loss guardianship
//! - `allocator`: Shared capital budgets across symbol loops
//! - `trader`: Per-symbol state, order execution, and the trading loop
//! - `persistence`: SQLite-backed durable state
//! - `notify`: Fire-and-forget outbound alerts
//! - `utils`: Shared decimal arithmetic helpers

pub mod allocator;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod market;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod trader;
pub mod utils;

pub use config::Config;
pub use error::EngineError;

//! Market statistics: volatility estimation and trend indicators.
//!
//! Everything in here is pure f64 math over price history; monetary values
//! stay `Decimal` and convert at the boundary.

pub mod indicators;
pub mod volatility;

pub use volatility::VolatilityEstimator;

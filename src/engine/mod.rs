//! Grid mechanics: volatility-driven sizing and band triggers.

pub mod grid;
pub mod trigger;

pub use grid::GridSizer;
pub use trigger::{GridSignal, TriggerBands, TriggerDetector};

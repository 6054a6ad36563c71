//! Per-symbol trader state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of a symbol trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraderStatus {
    Running,
    Stopped,
    Liquidated,
}

impl TraderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TraderStatus::Running => "running",
            TraderStatus::Stopped => "stopped",
            TraderStatus::Liquidated => "liquidated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(TraderStatus::Running),
            "stopped" => Some(TraderStatus::Stopped),
            "liquidated" => Some(TraderStatus::Liquidated),
            _ => None,
        }
    }
}

impl std::fmt::Display for TraderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable state for one symbol, owned exclusively by its trading loop
/// and rewritten to storage on every mutation.
///
/// Invariants: `base_price > 0`; `grid_size_pct` stays within the
/// configured bounds (enforced by the grid sizer before any mutation);
/// mutated only after a successful order or an explicit rebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderState {
    pub symbol: String,
    /// Grid center the bands are computed from.
    pub base_price: Decimal,
    pub grid_size_pct: Decimal,
    pub last_trade_price: Option<Decimal>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub status: TraderStatus,
}

impl TraderState {
    pub fn new(
        symbol: impl Into<String>,
        base_price: Decimal,
        grid_size_pct: Decimal,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(base_price > Decimal::ZERO, "base_price must be positive");
        Ok(Self {
            symbol: symbol.into(),
            base_price,
            grid_size_pct,
            last_trade_price: None,
            last_trade_time: None,
            status: TraderStatus::Running,
        })
    }

    /// Record a fill: the grid re-centers on the traded price.
    pub fn apply_fill(&mut self, price: Decimal, time: DateTime<Utc>) {
        debug_assert!(price > Decimal::ZERO);
        self.base_price = price;
        self.last_trade_price = Some(price);
        self.last_trade_time = Some(time);
    }

    /// Explicit re-center without a trade.
    pub fn rebase(&mut self, price: Decimal) -> anyhow::Result<()> {
        anyhow::ensure!(price > Decimal::ZERO, "rebase price must be positive");
        self.base_price = price;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.status == TraderStatus::Running
    }
}

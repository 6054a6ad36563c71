//! Read-only status surface for the monitoring layer.
//!
//! Each trading loop refreshes its snapshot once per cycle; readers never
//! contend with the hot path beyond a brief RwLock acquisition.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::risk::RiskState;
use crate::trader::executor::TradeRecord;
use crate::trader::state::TraderStatus;

/// Point-in-time view of one symbol trader.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub symbol: String,
    pub status: TraderStatus,
    pub base_price: Decimal,
    pub current_price: Decimal,
    pub grid_size_pct: Decimal,
    pub risk_state: RiskState,
    pub position_ratio: Decimal,
    pub realized_profit: Decimal,
    pub recent_trades: Vec<TradeRecord>,
    pub cycles: u64,
    pub started_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn uptime_secs(&self) -> i64 {
        (self.refreshed_at - self.started_at).num_seconds()
    }
}

/// Shared registry of per-symbol snapshots.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<HashMap<String, StatusSnapshot>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, snapshot: StatusSnapshot) {
        self.inner
            .write()
            .await
            .insert(snapshot.symbol.clone(), snapshot);
    }

    pub async fn snapshot(&self, symbol: &str) -> Option<StatusSnapshot> {
        self.inner.read().await.get(symbol).cloned()
    }

    pub async fn all(&self) -> Vec<StatusSnapshot> {
        let mut snapshots: Vec<StatusSnapshot> =
            self.inner.read().await.values().cloned().collect();
        snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(symbol: &str, cycles: u64) -> StatusSnapshot {
        StatusSnapshot {
            symbol: symbol.to_string(),
            status: TraderStatus::Running,
            base_price: dec!(600),
            current_price: dec!(602),
            grid_size_pct: dec!(0.02),
            risk_state: RiskState::AllowAll,
            position_ratio: dec!(0.5),
            realized_profit: Decimal::ZERO,
            recent_trades: Vec::new(),
            cycles,
            started_at: Utc::now(),
            refreshed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_overwrites_per_symbol() {
        let board = StatusBoard::new();
        board.publish(snapshot("BNBUSDT", 1)).await;
        board.publish(snapshot("BNBUSDT", 2)).await;

        let current = board.snapshot("BNBUSDT").await.unwrap();
        assert_eq!(current.cycles, 2);
    }

    #[tokio::test]
    async fn test_all_sorted_by_symbol() {
        let board = StatusBoard::new();
        board.publish(snapshot("ETHUSDT", 1)).await;
        board.publish(snapshot("BNBUSDT", 1)).await;

        let all = board.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].symbol, "BNBUSDT");
        assert_eq!(all[1].symbol, "ETHUSDT");
    }
}

//! SQLite persistence for trader state and trade history.
//!
//! One `trader_state` row per symbol, rewritten inside a transaction on
//! every mutation so a crash can never leave a partial write. Trade
//! history is append-only. Decimals are stored as TEXT to survive the
//! round trip exactly.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::exchange::OrderSide;
use crate::trader::executor::TradeRecord;
use crate::trader::state::{TraderState, TraderStatus};

/// SQLite-backed state store.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (or create) the database and initialize the schema.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("State store opened at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- One row per symbol, rewritten on every state mutation
            CREATE TABLE IF NOT EXISTS trader_state (
                symbol TEXT PRIMARY KEY,
                base_price TEXT NOT NULL,
                grid_size_pct TEXT NOT NULL,
                last_trade_price TEXT,
                last_trade_time TEXT,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Append-only trade history
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                amount TEXT NOT NULL,
                profit TEXT NOT NULL,
                order_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Upsert one symbol's state atomically.
    pub fn save_state(&self, state: &TraderState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO trader_state (symbol, base_price, grid_size_pct,
                                      last_trade_price, last_trade_time, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(symbol) DO UPDATE SET
                base_price = ?2,
                grid_size_pct = ?3,
                last_trade_price = ?4,
                last_trade_time = ?5,
                status = ?6,
                updated_at = ?7
            "#,
            params![
                state.symbol,
                state.base_price.to_string(),
                state.grid_size_pct.to_string(),
                state.last_trade_price.map(|p| p.to_string()),
                state.last_trade_time.map(|t| t.to_rfc3339()),
                state.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        tx.commit()?;

        debug!(symbol = %state.symbol, base_price = %state.base_price, "Trader state saved");
        Ok(())
    }

    /// Load one symbol's state, if previously saved.
    pub fn load_state(&self, symbol: &str) -> Result<Option<TraderState>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT base_price, grid_size_pct, last_trade_price, last_trade_time, status
                FROM trader_state WHERE symbol = ?1
                "#,
                params![symbol],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((base_price, grid, last_price, last_time, status)) = row else {
            return Ok(None);
        };

        let state = TraderState {
            symbol: symbol.to_string(),
            base_price: Decimal::from_str(&base_price)
                .with_context(|| format!("corrupt base_price for {symbol}"))?,
            grid_size_pct: Decimal::from_str(&grid)
                .with_context(|| format!("corrupt grid_size_pct for {symbol}"))?,
            last_trade_price: last_price
                .map(|p| Decimal::from_str(&p))
                .transpose()
                .with_context(|| format!("corrupt last_trade_price for {symbol}"))?,
            last_trade_time: last_time
                .map(|t| {
                    DateTime::parse_from_rfc3339(&t).map(|dt| dt.with_timezone(&Utc))
                })
                .transpose()
                .with_context(|| format!("corrupt last_trade_time for {symbol}"))?,
            status: TraderStatus::parse(&status)
                .ok_or_else(|| anyhow::anyhow!("unknown status '{status}' for {symbol}"))?,
        };

        Ok(Some(state))
    }

    /// All persisted symbol states (for the status CLI).
    pub fn load_all_states(&self) -> Result<Vec<TraderState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT symbol FROM trader_state ORDER BY symbol")?;
        let symbols: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut states = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if let Some(state) = self.load_state(&symbol)? {
                states.push(state);
            }
        }
        Ok(states)
    }

    /// Append one trade to the history.
    pub fn record_trade(&self, symbol: &str, record: &TradeRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO trades (symbol, timestamp, side, price, amount, profit, order_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                symbol,
                record.timestamp.to_rfc3339(),
                record.side.as_str(),
                record.price.to_string(),
                record.amount.to_string(),
                record.profit.to_string(),
                record.order_id,
            ],
        )?;
        Ok(())
    }

    /// Most recent trades for a symbol, newest first.
    pub fn recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<TradeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, side, price, amount, profit, order_id
            FROM trades
            WHERE symbol = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;

        let records: Vec<TradeRecord> = stmt
            .query_map(params![symbol, limit], |row| {
                let timestamp: String = row.get(0)?;
                let side: String = row.get(1)?;
                let price: String = row.get(2)?;
                let amount: String = row.get(3)?;
                let profit: String = row.get(4)?;
                let order_id: String = row.get(5)?;
                Ok((timestamp, side, price, amount, profit, order_id))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(timestamp, side, price, amount, profit, order_id)| {
                Some(TradeRecord {
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .ok()?
                        .with_timezone(&Utc),
                    side: match side.as_str() {
                        "BUY" => OrderSide::Buy,
                        "SELL" => OrderSide::Sell,
                        _ => return None,
                    },
                    price: Decimal::from_str(&price).ok()?,
                    amount: Decimal::from_str(&amount).ok()?,
                    profit: Decimal::from_str(&profit).ok()?,
                    order_id,
                })
            })
            .collect();

        Ok(records)
    }

    /// Total realized profit per the persisted history.
    pub fn total_profit(&self, symbol: &str) -> Result<Decimal> {
        let mut stmt = self
            .conn
            .prepare("SELECT profit FROM trades WHERE symbol = ?1")?;
        let sum = stmt
            .query_map(params![symbol], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|p| Decimal::from_str(&p).ok())
            .sum();
        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_state(symbol: &str) -> TraderState {
        TraderState {
            symbol: symbol.to_string(),
            base_price: dec!(600),
            grid_size_pct: dec!(0.02),
            last_trade_price: Some(dec!(598.5)),
            last_trade_time: Some(Utc::now()),
            status: TraderStatus::Running,
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = StateStore::in_memory().unwrap();
        let state = sample_state("BNBUSDT");

        store.save_state(&state).unwrap();
        let loaded = store.load_state("BNBUSDT").unwrap().unwrap();

        assert_eq!(loaded.base_price, dec!(600));
        assert_eq!(loaded.grid_size_pct, dec!(0.02));
        assert_eq!(loaded.last_trade_price, Some(dec!(598.5)));
        assert_eq!(loaded.status, TraderStatus::Running);
    }

    #[test]
    fn test_upsert_overwrites() {
        let store = StateStore::in_memory().unwrap();
        let mut state = sample_state("BNBUSDT");

        store.save_state(&state).unwrap();
        state.base_price = dec!(612);
        state.status = TraderStatus::Liquidated;
        store.save_state(&state).unwrap();

        let loaded = store.load_state("BNBUSDT").unwrap().unwrap();
        assert_eq!(loaded.base_price, dec!(612));
        assert_eq!(loaded.status, TraderStatus::Liquidated);

        assert_eq!(store.load_all_states().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_symbol_is_none() {
        let store = StateStore::in_memory().unwrap();
        assert!(store.load_state("NOPE").unwrap().is_none());
    }

    #[test]
    fn test_trade_history_append_and_read() {
        let store = StateStore::in_memory().unwrap();

        for i in 0..3 {
            store
                .record_trade(
                    "BNBUSDT",
                    &TradeRecord {
                        timestamp: Utc::now(),
                        side: if i % 2 == 0 {
                            OrderSide::Buy
                        } else {
                            OrderSide::Sell
                        },
                        price: dec!(600) + Decimal::from(i),
                        amount: dec!(1),
                        profit: Decimal::from(i),
                        order_id: format!("order-{i}"),
                    },
                )
                .unwrap();
        }

        let recent = store.recent_trades("BNBUSDT", 2).unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first
        assert_eq!(recent[0].order_id, "order-2");

        assert_eq!(store.total_profit("BNBUSDT").unwrap(), dec!(3));
        assert!(store.recent_trades("ETHUSDT", 5).unwrap().is_empty());
    }
}

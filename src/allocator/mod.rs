//! Shared capital allocation across symbol engines.
//!
//! The only state in the system mutated by more than one task. Every
//! mutation happens under one mutex acquisition, and authorization
//! *reserves* capital in the same critical section that checks it, so two
//! symbols can never jointly pass a check and overspend the global budget.
//!
//! Lifecycle of one buy:
//!   `begin_trade` (check + hold) → order fills → `record_trade`
//!   (hold → used), or the order fails → `release_hold`.
//! Sells call `record_trade` directly; they free capital.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::exchange::OrderSide;

/// How the initial per-symbol budgets are derived.
#[derive(Debug, Clone)]
pub enum AllocationStrategy {
    /// Even split of total capital across all registered symbols.
    Equal,
    /// Caller-supplied weights per symbol; must sum to exactly 1.
    Weighted(HashMap<String, Decimal>),
    /// Starts equal, periodically re-weighted by realized performance.
    Dynamic,
}

impl AllocationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            AllocationStrategy::Equal => "equal",
            AllocationStrategy::Weighted(_) => "weighted",
            AllocationStrategy::Dynamic => "dynamic",
        }
    }
}

/// Capital ledger entry for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRecord {
    pub allocated_capital: Decimal,
    /// Capital committed to filled buys, released by sells.
    pub used_capital: Decimal,
    /// Capital held for in-flight orders awaiting fill or failure.
    pub pending_capital: Decimal,
    /// Cumulative realized profit, input to dynamic rebalancing.
    pub realized_profit: Decimal,
}

impl AllocationRecord {
    fn with_allocation(allocated: Decimal) -> Self {
        Self {
            allocated_capital: allocated,
            used_capital: Decimal::ZERO,
            pending_capital: Decimal::ZERO,
            realized_profit: Decimal::ZERO,
        }
    }

    pub fn committed(&self) -> Decimal {
        self.used_capital + self.pending_capital
    }
}

struct Ledger {
    records: HashMap<String, AllocationRecord>,
    last_rebalance: Instant,
}

/// Thread-safe capital arbiter shared by all symbol loops.
pub struct FundAllocator {
    total_capital: Decimal,
    max_global_usage: Decimal,
    strategy: AllocationStrategy,
    rebalance_interval: Duration,
    ledger: Mutex<Ledger>,
}

impl FundAllocator {
    pub fn new(
        total_capital: Decimal,
        max_global_usage: Decimal,
        strategy: AllocationStrategy,
        rebalance_interval: Duration,
        symbols: &[String],
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(total_capital > Decimal::ZERO, "total_capital must be positive");
        anyhow::ensure!(
            max_global_usage > Decimal::ZERO && max_global_usage <= Decimal::ONE,
            "max_global_usage must be in (0,1]"
        );
        anyhow::ensure!(!symbols.is_empty(), "at least one symbol must be registered");

        let records = match &strategy {
            AllocationStrategy::Equal | AllocationStrategy::Dynamic => {
                let share = total_capital / Decimal::from(symbols.len());
                symbols
                    .iter()
                    .map(|s| (s.clone(), AllocationRecord::with_allocation(share)))
                    .collect()
            }
            AllocationStrategy::Weighted(weights) => {
                let mut sum = Decimal::ZERO;
                for symbol in symbols {
                    let w = weights.get(symbol).ok_or_else(|| {
                        anyhow::anyhow!("missing allocation weight for {symbol}")
                    })?;
                    anyhow::ensure!(
                        *w > Decimal::ZERO,
                        "allocation weight for {symbol} must be positive"
                    );
                    sum += *w;
                }
                anyhow::ensure!(
                    sum == Decimal::ONE,
                    "allocation weights must sum to 1.0, got {sum}"
                );
                symbols
                    .iter()
                    .map(|s| {
                        let share = total_capital * weights[s];
                        (s.clone(), AllocationRecord::with_allocation(share))
                    })
                    .collect()
            }
        };

        info!(
            %total_capital,
            %max_global_usage,
            strategy = strategy.name(),
            symbols = symbols.len(),
            "Fund allocator initialized"
        );

        Ok(Self {
            total_capital,
            max_global_usage,
            strategy,
            rebalance_interval,
            ledger: Mutex::new(Ledger {
                records,
                last_rebalance: Instant::now(),
            }),
        })
    }

    fn global_cap(&self) -> Decimal {
        self.total_capital * self.max_global_usage
    }

    /// Non-reserving budget check (status surface, pre-flight logging).
    ///
    /// The trading loop itself uses [`begin_trade`](Self::begin_trade),
    /// whose check and reservation are one atomic step.
    pub fn check_trade_allowed(&self, symbol: &str, amount: Decimal) -> bool {
        let ledger = self.ledger.lock().expect("allocator lock poisoned");
        self.admissible(&ledger, symbol, amount).is_ok()
    }

    /// Atomically authorize a buy and hold `amount` against its budgets.
    ///
    /// The hold is settled by [`record_trade`](Self::record_trade) on fill
    /// or returned by [`release_hold`](Self::release_hold) on failure.
    pub fn begin_trade(&self, symbol: &str, amount: Decimal) -> Result<(), EngineError> {
        let mut ledger = self.ledger.lock().expect("allocator lock poisoned");

        if let Err(reason) = self.admissible(&ledger, symbol, amount) {
            debug!(symbol, %amount, reason, "Trade denied by fund allocator");
            return Err(EngineError::AllocationDenied {
                symbol: symbol.to_string(),
                reason,
            });
        }

        let record = ledger
            .records
            .get_mut(symbol)
            .expect("admissible() verified the symbol exists");
        record.pending_capital += amount;

        debug!(
            symbol,
            %amount,
            pending = %record.pending_capital,
            used = %record.used_capital,
            "Capital hold placed"
        );
        Ok(())
    }

    fn admissible(&self, ledger: &Ledger, symbol: &str, amount: Decimal) -> Result<(), String> {
        let Some(record) = ledger.records.get(symbol) else {
            return Err(format!("symbol {symbol} is not registered"));
        };

        if record.committed() + amount > record.allocated_capital {
            return Err(format!(
                "symbol budget exceeded: committed {} + {} > allocated {}",
                record.committed(),
                amount,
                record.allocated_capital
            ));
        }

        let global_committed: Decimal =
            ledger.records.values().map(|r| r.committed()).sum();
        if global_committed + amount > self.global_cap() {
            return Err(format!(
                "global budget exceeded: committed {} + {} > cap {}",
                global_committed,
                amount,
                self.global_cap()
            ));
        }

        Ok(())
    }

    /// Settle a filled order. Must be called exactly once per fill and
    /// never for failed or canceled orders.
    pub fn record_trade(&self, symbol: &str, amount: Decimal, side: OrderSide) {
        let mut ledger = self.ledger.lock().expect("allocator lock poisoned");
        let Some(record) = ledger.records.get_mut(symbol) else {
            warn!(symbol, "record_trade for unregistered symbol ignored");
            return;
        };

        match side {
            OrderSide::Buy => {
                // Hold placed by begin_trade becomes used capital
                record.pending_capital = (record.pending_capital - amount).max(Decimal::ZERO);
                record.used_capital += amount;
            }
            OrderSide::Sell => {
                // Clamped: a restart that lost in-memory history must not
                // unlock more than the configured allocation
                record.used_capital = (record.used_capital - amount).max(Decimal::ZERO);
            }
        }

        debug!(
            symbol,
            %amount,
            %side,
            used = %record.used_capital,
            pending = %record.pending_capital,
            "Trade recorded in capital ledger"
        );
    }

    /// Return a hold placed by `begin_trade` after the order failed.
    pub fn release_hold(&self, symbol: &str, amount: Decimal) {
        let mut ledger = self.ledger.lock().expect("allocator lock poisoned");
        if let Some(record) = ledger.records.get_mut(symbol) {
            record.pending_capital = (record.pending_capital - amount).max(Decimal::ZERO);
            debug!(symbol, %amount, "Capital hold released");
        }
    }

    /// Feed realized profit into the performance ledger (dynamic strategy).
    pub fn record_performance(&self, symbol: &str, profit: Decimal) {
        let mut ledger = self.ledger.lock().expect("allocator lock poisoned");
        if let Some(record) = ledger.records.get_mut(symbol) {
            record.realized_profit += profit;
        }
    }

    /// Periodic dynamic reallocation; a no-op for other strategies and
    /// when called before the interval has elapsed.
    ///
    /// Budgets never drop below a symbol's committed capital, so trades
    /// already in flight are unaffected.
    pub fn rebalance_if_needed(&self) {
        if !matches!(self.strategy, AllocationStrategy::Dynamic) {
            return;
        }

        let mut ledger = self.ledger.lock().expect("allocator lock poisoned");
        if ledger.last_rebalance.elapsed() < self.rebalance_interval {
            return;
        }
        ledger.last_rebalance = Instant::now();

        // Score each symbol by realized return on its current budget,
        // bounded so one outlier cannot starve the rest.
        let scores: HashMap<String, Decimal> = ledger
            .records
            .iter()
            .map(|(symbol, record)| {
                let ret = if record.allocated_capital > Decimal::ZERO {
                    record.realized_profit / record.allocated_capital
                } else {
                    Decimal::ZERO
                };
                let score = (Decimal::ONE + ret).clamp(dec!(0.5), dec!(1.5));
                (symbol.clone(), score)
            })
            .collect();

        let score_sum: Decimal = scores.values().sum();
        if score_sum <= Decimal::ZERO {
            return;
        }

        for (symbol, record) in ledger.records.iter_mut() {
            let target = self.total_capital * scores[symbol] / score_sum;
            let floor = record.committed();
            let new_allocation = target.max(floor);
            if new_allocation != record.allocated_capital {
                info!(
                    symbol,
                    old = %record.allocated_capital,
                    new = %new_allocation,
                    profit = %record.realized_profit,
                    "Dynamic rebalance adjusted allocation"
                );
                record.allocated_capital = new_allocation;
            }
        }
    }

    /// Sum of used capital across all symbols.
    pub fn total_used(&self) -> Decimal {
        let ledger = self.ledger.lock().expect("allocator lock poisoned");
        ledger.records.values().map(|r| r.used_capital).sum()
    }

    /// Sum of used plus held capital across all symbols.
    pub fn total_committed(&self) -> Decimal {
        let ledger = self.ledger.lock().expect("allocator lock poisoned");
        ledger.records.values().map(|r| r.committed()).sum()
    }

    /// Point-in-time copy of one symbol's ledger entry.
    pub fn record_for(&self, symbol: &str) -> Option<AllocationRecord> {
        let ledger = self.ledger.lock().expect("allocator lock poisoned");
        ledger.records.get(symbol).cloned()
    }
}

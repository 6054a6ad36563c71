//! Position-ratio risk evaluation.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::utils::decimal::safe_div;

use super::RiskState;

/// Min/max position-ratio bounds, both in [0,1] with min < max.
///
/// Range validity is checked once at config load, not per lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionLimits {
    pub min_ratio: Decimal,
    pub max_ratio: Decimal,
}

impl PositionLimits {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.min_ratio >= Decimal::ZERO && self.max_ratio <= Decimal::ONE,
            "position ratio limits must lie in [0,1], got [{}, {}]",
            self.min_ratio,
            self.max_ratio
        );
        anyhow::ensure!(
            self.min_ratio < self.max_ratio,
            "min_ratio {} must be below max_ratio {}",
            self.min_ratio,
            self.max_ratio
        );
        Ok(())
    }
}

/// Derived view of the account for one symbol. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    /// Value of the held base asset, in quote terms.
    pub base_value: Decimal,
    /// Free quote balance.
    pub quote_value: Decimal,
    /// base_value / (base_value + quote_value), in [0,1].
    pub position_ratio: Decimal,
}

impl PositionSnapshot {
    pub fn new(base_amount: Decimal, price: Decimal, quote_value: Decimal) -> Self {
        let base_value = base_amount * price;
        let total = base_value + quote_value;
        Self {
            base_value,
            quote_value,
            position_ratio: safe_div(base_value, total),
        }
    }

    pub fn total_value(&self) -> Decimal {
        self.base_value + self.quote_value
    }
}

/// Where the active limits came from, for the decision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSource {
    SymbolOverride,
    GlobalDefault,
}

/// Maps a position snapshot to a [`RiskState`].
///
/// Memoryless: every evaluation works purely from the current snapshot.
pub struct PositionRiskEvaluator {
    default_limits: PositionLimits,
    overrides: HashMap<String, PositionLimits>,
}

impl PositionRiskEvaluator {
    pub fn new(default_limits: PositionLimits, overrides: HashMap<String, PositionLimits>) -> Self {
        Self {
            default_limits,
            overrides,
        }
    }

    /// Resolve the active limits for a symbol and say where they came from.
    pub fn limits_for(&self, symbol: &str) -> (PositionLimits, LimitSource) {
        match self.overrides.get(symbol) {
            Some(limits) => (*limits, LimitSource::SymbolOverride),
            None => (self.default_limits, LimitSource::GlobalDefault),
        }
    }

    /// Evaluate the ratio against the resolved limits.
    pub fn evaluate(&self, symbol: &str, snapshot: &PositionSnapshot) -> RiskState {
        let (limits, source) = self.limits_for(symbol);
        let ratio = snapshot.position_ratio;

        let state = if ratio > limits.max_ratio {
            RiskState::AllowSellOnly
        } else if ratio < limits.min_ratio {
            RiskState::AllowBuyOnly
        } else {
            RiskState::AllowAll
        };

        if state != RiskState::AllowAll {
            info!(
                symbol,
                %ratio,
                min_ratio = %limits.min_ratio,
                max_ratio = %limits.max_ratio,
                source = ?source,
                %state,
                "Position limits restrict trading"
            );
        } else {
            debug!(
                symbol,
                %ratio,
                min_ratio = %limits.min_ratio,
                max_ratio = %limits.max_ratio,
                source = ?source,
                "Position ratio within limits"
            );
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limits(min: Decimal, max: Decimal) -> PositionLimits {
        PositionLimits {
            min_ratio: min,
            max_ratio: max,
        }
    }

    fn snapshot_with_ratio(ratio: Decimal) -> PositionSnapshot {
        // total of 1000 quote units split to hit the requested ratio
        let base_value = ratio * dec!(1000);
        PositionSnapshot::new(base_value, Decimal::ONE, dec!(1000) - base_value)
    }

    #[test]
    fn test_ratio_computation() {
        let snap = PositionSnapshot::new(dec!(2), dec!(600), dec!(800));
        assert_eq!(snap.base_value, dec!(1200));
        assert_eq!(snap.position_ratio, dec!(0.6));
    }

    #[test]
    fn test_zero_total_is_not_a_crash() {
        let snap = PositionSnapshot::new(Decimal::ZERO, dec!(600), Decimal::ZERO);
        assert_eq!(snap.position_ratio, Decimal::ZERO);
    }

    #[test]
    fn test_over_limit_blocks_buys() {
        let eval = PositionRiskEvaluator::new(limits(dec!(0.2), dec!(0.8)), HashMap::new());
        let state = eval.evaluate("BNBUSDT", &snapshot_with_ratio(dec!(0.85)));
        assert_eq!(state, RiskState::AllowSellOnly);
    }

    #[test]
    fn test_under_limit_blocks_sells() {
        let eval = PositionRiskEvaluator::new(limits(dec!(0.2), dec!(0.8)), HashMap::new());
        let state = eval.evaluate("BNBUSDT", &snapshot_with_ratio(dec!(0.1)));
        assert_eq!(state, RiskState::AllowBuyOnly);
    }

    #[test]
    fn test_within_limits_allows_all() {
        let eval = PositionRiskEvaluator::new(limits(dec!(0.2), dec!(0.8)), HashMap::new());
        let state = eval.evaluate("BNBUSDT", &snapshot_with_ratio(dec!(0.5)));
        assert_eq!(state, RiskState::AllowAll);
    }

    #[test]
    fn test_override_resolution() {
        let mut overrides = HashMap::new();
        overrides.insert("BNBUSDT".to_string(), limits(dec!(0.1), dec!(0.9)));
        let eval = PositionRiskEvaluator::new(limits(dec!(0.2), dec!(0.8)), overrides);

        // 0.85 exceeds the global max but sits inside the override
        let (active, source) = eval.limits_for("BNBUSDT");
        assert_eq!(source, LimitSource::SymbolOverride);
        assert_eq!(active.max_ratio, dec!(0.9));
        assert_eq!(
            eval.evaluate("BNBUSDT", &snapshot_with_ratio(dec!(0.85))),
            RiskState::AllowAll
        );

        // A symbol without an override falls back to the global bounds
        let (_, source) = eval.limits_for("ETHUSDT");
        assert_eq!(source, LimitSource::GlobalDefault);
        assert_eq!(
            eval.evaluate("ETHUSDT", &snapshot_with_ratio(dec!(0.85))),
            RiskState::AllowSellOnly
        );
    }

    #[test]
    fn test_limit_validation() {
        assert!(limits(dec!(0.2), dec!(0.8)).validate().is_ok());
        assert!(limits(dec!(0.8), dec!(0.2)).validate().is_err());
        assert!(limits(dec!(-0.1), dec!(0.8)).validate().is_err());
        assert!(limits(dec!(0.2), dec!(1.5)).validate().is_err());
    }
}

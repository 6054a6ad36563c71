//! Layered risk controls for the trading loop.
//!
//! Three independent gates evaluated every cycle, in precedence order:
//! 1. `StopLossGuardian`: can force liquidation, overriding everything
//! 2. `TrendOverseer`: can narrow the allowed trade directions
//! 3. `PositionRiskEvaluator`: position-ratio limits
//!
//! The loop composes 2 and 3 into a single [`RiskState`]; the guardian is
//! checked first and short-circuits the cycle entirely.

pub mod position;
pub mod stop_loss;
pub mod trend;

pub use position::{PositionLimits, PositionRiskEvaluator, PositionSnapshot};
pub use stop_loss::{StopLossGuardian, StopReason};
pub use trend::{TrendDirection, TrendOverseer, TrendSignal};

use serde::Serialize;

use crate::exchange::OrderSide;

/// Coarse allow/deny gate on trade direction.
///
/// Recomputed fresh every cycle from the current snapshot; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskState {
    AllowAll,
    AllowBuyOnly,
    AllowSellOnly,
}

impl RiskState {
    /// Whether a trade on `side` passes this gate.
    pub fn permits(self, side: OrderSide) -> bool {
        match (self, side) {
            (RiskState::AllowAll, _) => true,
            (RiskState::AllowBuyOnly, OrderSide::Buy) => true,
            (RiskState::AllowSellOnly, OrderSide::Sell) => true,
            _ => false,
        }
    }

    /// Apply a trend override: the override may only narrow an
    /// unrestricted state, never widen or flip an existing restriction.
    pub fn narrowed_by(self, override_state: Option<RiskState>) -> RiskState {
        match (self, override_state) {
            (RiskState::AllowAll, Some(narrower)) => narrower,
            _ => self,
        }
    }
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RiskState::AllowAll => "allow_all",
            RiskState::AllowBuyOnly => "allow_buy_only",
            RiskState::AllowSellOnly => "allow_sell_only",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permits() {
        assert!(RiskState::AllowAll.permits(OrderSide::Buy));
        assert!(RiskState::AllowAll.permits(OrderSide::Sell));
        assert!(RiskState::AllowBuyOnly.permits(OrderSide::Buy));
        assert!(!RiskState::AllowBuyOnly.permits(OrderSide::Sell));
        assert!(!RiskState::AllowSellOnly.permits(OrderSide::Buy));
        assert!(RiskState::AllowSellOnly.permits(OrderSide::Sell));
    }

    #[test]
    fn test_override_only_narrows() {
        // Unrestricted state accepts the narrowing
        assert_eq!(
            RiskState::AllowAll.narrowed_by(Some(RiskState::AllowBuyOnly)),
            RiskState::AllowBuyOnly
        );

        // An existing restriction is never widened or flipped
        assert_eq!(
            RiskState::AllowSellOnly.narrowed_by(Some(RiskState::AllowBuyOnly)),
            RiskState::AllowSellOnly
        );
        assert_eq!(
            RiskState::AllowBuyOnly.narrowed_by(Some(RiskState::AllowAll)),
            RiskState::AllowBuyOnly
        );

        // No override is a no-op
        assert_eq!(
            RiskState::AllowAll.narrowed_by(None),
            RiskState::AllowAll
        );
    }
}

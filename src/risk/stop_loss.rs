//! Stop-loss guardianship: hard price floor and profit drawdown.
//!
//! Checked ahead of every other risk gate each cycle. Either trigger
//! demands full liquidation of the symbol and termination of its loop.

use rust_decimal::Decimal;
use tracing::warn;

use crate::utils::decimal::safe_div;

/// Why the guardian fired, with the decisive inputs for the log trail.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Price fell to or below the configured floor under the base price.
    PriceStop {
        price: Decimal,
        floor: Decimal,
        base_price: Decimal,
    },
    /// Profit gave back too much of its observed peak.
    DrawdownStop {
        current_profit: Decimal,
        peak_profit: Decimal,
        drawdown: Decimal,
        limit: Decimal,
    },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::PriceStop {
                price,
                floor,
                base_price,
            } => write!(
                f,
                "price {price} breached stop floor {floor} (base {base_price})"
            ),
            StopReason::DrawdownStop {
                current_profit,
                peak_profit,
                drawdown,
                limit,
            } => write!(
                f,
                "profit {current_profit} is {drawdown} off peak {peak_profit} (limit {limit})"
            ),
        }
    }
}

/// Independent per-symbol stop-loss monitor.
pub struct StopLossGuardian {
    stop_loss_pct: Decimal,
    drawdown_pct: Decimal,
    /// Highest profit observed so far; the drawdown trigger stays
    /// disarmed until this turns positive.
    max_profit_seen: Decimal,
}

impl StopLossGuardian {
    pub fn new(stop_loss_pct: Decimal, drawdown_pct: Decimal) -> Self {
        Self {
            stop_loss_pct,
            drawdown_pct,
            max_profit_seen: Decimal::ZERO,
        }
    }

    pub fn max_profit_seen(&self) -> Decimal {
        self.max_profit_seen
    }

    /// Evaluate both triggers against the current cycle's figures.
    ///
    /// `current_profit` is realized plus unrealized profit for the symbol.
    /// Returns the first trigger that fired, price stop taking precedence.
    pub fn check(
        &mut self,
        base_price: Decimal,
        current_price: Decimal,
        current_profit: Decimal,
    ) -> Option<StopReason> {
        if current_profit > self.max_profit_seen {
            self.max_profit_seen = current_profit;
        }

        let floor = base_price * (Decimal::ONE - self.stop_loss_pct);
        if current_price <= floor {
            let reason = StopReason::PriceStop {
                price: current_price,
                floor,
                base_price,
            };
            warn!(%current_price, %floor, %base_price, "Price stop triggered");
            return Some(reason);
        }

        if self.max_profit_seen > Decimal::ZERO {
            let drawdown = safe_div(self.max_profit_seen - current_profit, self.max_profit_seen);
            if drawdown >= self.drawdown_pct {
                let reason = StopReason::DrawdownStop {
                    current_profit,
                    peak_profit: self.max_profit_seen,
                    drawdown,
                    limit: self.drawdown_pct,
                };
                warn!(
                    %current_profit,
                    peak = %self.max_profit_seen,
                    %drawdown,
                    limit = %self.drawdown_pct,
                    "Drawdown stop triggered"
                );
                return Some(reason);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_stop_fires_at_floor() {
        let mut guardian = StopLossGuardian::new(dec!(0.15), dec!(0.5));

        // base 600, stop 15% => floor 510
        assert!(guardian.check(dec!(600), dec!(520), Decimal::ZERO).is_none());
        assert!(guardian.check(dec!(600), dec!(511), Decimal::ZERO).is_none());

        let reason = guardian.check(dec!(600), dec!(510), Decimal::ZERO).unwrap();
        assert!(matches!(
            reason,
            StopReason::PriceStop { floor, .. } if floor == dec!(510)
        ));
    }

    #[test]
    fn test_price_stop_fires_below_floor() {
        let mut guardian = StopLossGuardian::new(dec!(0.15), dec!(0.5));
        // A gap straight through the floor still triggers
        assert!(guardian.check(dec!(600), dec!(505), Decimal::ZERO).is_some());
    }

    #[test]
    fn test_drawdown_stop_tracks_peak() {
        let mut guardian = StopLossGuardian::new(dec!(0.5), dec!(0.4));

        assert!(guardian.check(dec!(600), dec!(600), dec!(100)).is_none());
        assert_eq!(guardian.max_profit_seen(), dec!(100));

        // 30% off peak: holds
        assert!(guardian.check(dec!(600), dec!(600), dec!(70)).is_none());

        // 40% off peak: fires
        let reason = guardian.check(dec!(600), dec!(600), dec!(60)).unwrap();
        assert!(matches!(
            reason,
            StopReason::DrawdownStop { drawdown, .. } if drawdown == dec!(0.4)
        ));
    }

    #[test]
    fn test_drawdown_disarmed_without_positive_peak() {
        let mut guardian = StopLossGuardian::new(dec!(0.5), dec!(0.1));

        // Losses from the start never arm the drawdown trigger
        assert!(guardian.check(dec!(600), dec!(590), dec!(-50)).is_none());
        assert!(guardian.check(dec!(600), dec!(580), dec!(-80)).is_none());
    }

    #[test]
    fn test_price_stop_takes_precedence_over_drawdown() {
        let mut guardian = StopLossGuardian::new(dec!(0.15), dec!(0.1));
        guardian.check(dec!(600), dec!(600), dec!(100));

        // Both conditions hold; the price stop is reported
        let reason = guardian.check(dec!(600), dec!(500), dec!(0)).unwrap();
        assert!(matches!(reason, StopReason::PriceStop { .. }));
    }
}

//! Trend oversight: multi-period direction and strength classification.
//!
//! The overseer never originates trades. Its only power is to narrow an
//! unrestricted risk state when a strong, confident trend is present:
//! blocking sells into a strong uptrend and buys into a strong downtrend.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::TrendConfig;
use crate::exchange::Kline;
use crate::market::indicators::{directional_index, ema_last};
use crate::utils::decimal::to_f64;

use super::RiskState;

/// Five-way trend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    StrongUp,
    ModerateUp,
    Sideways,
    ModerateDown,
    StrongDown,
}

/// One trend assessment. Cached with a TTL by the trading loop and
/// discarded on restart.
#[derive(Debug, Clone, Serialize)]
pub struct TrendSignal {
    pub direction: TrendDirection,
    /// ADX-style strength in [0,100].
    pub strength: f64,
    /// Assessment confidence in [0,1].
    pub confidence: f64,
    pub reason: String,
    pub computed_at: DateTime<Utc>,
}

impl TrendSignal {
    /// Neutral no-op signal used whenever indicators cannot be computed.
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self {
            direction: TrendDirection::Sideways,
            strength: 0.0,
            confidence: 0.0,
            reason: reason.into(),
            computed_at: Utc::now(),
        }
    }
}

/// EMA separation below this is treated as sideways.
const SIDEWAYS_SEPARATION: f64 = 0.002;

/// Separation beyond this adds confidence.
const WIDE_SEPARATION: f64 = 0.01;

/// Computes trend signals and their risk-state overrides.
pub struct TrendOverseer {
    config: TrendConfig,
}

impl TrendOverseer {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    /// Classify the trend from OHLC history (oldest first).
    ///
    /// Indicator starvation or any computation failure degrades to a
    /// neutral signal, never an error.
    pub fn assess(&self, klines: &[Kline]) -> TrendSignal {
        let closes: Vec<f64> = klines.iter().map(|k| to_f64(k.close)).collect();
        let highs: Vec<f64> = klines.iter().map(|k| to_f64(k.high)).collect();
        let lows: Vec<f64> = klines.iter().map(|k| to_f64(k.low)).collect();

        let (Some(fast), Some(slow)) = (
            ema_last(&closes, self.config.ema_fast),
            ema_last(&closes, self.config.ema_slow),
        ) else {
            warn!(
                samples = closes.len(),
                "Trend EMAs unavailable, degrading to neutral"
            );
            return TrendSignal::neutral(format!(
                "insufficient history for EMAs ({} bars)",
                closes.len()
            ));
        };

        let Some(di) = directional_index(&highs, &lows, &closes, self.config.adx_period) else {
            warn!(
                samples = closes.len(),
                "Directional index unavailable, degrading to neutral"
            );
            return TrendSignal::neutral(format!(
                "insufficient history for ADX ({} bars)",
                closes.len()
            ));
        };

        if slow.abs() < f64::EPSILON || !di.adx.is_finite() {
            return TrendSignal::neutral("degenerate indicator inputs");
        }

        let separation = (fast - slow) / slow;
        let strength = di.adx.clamp(0.0, 100.0);
        let di_agrees = if separation >= 0.0 {
            di.plus_di >= di.minus_di
        } else {
            di.minus_di >= di.plus_di
        };

        let mut confidence: f64 = 0.5;
        if di_agrees {
            confidence += 0.3;
        }
        if separation.abs() > WIDE_SEPARATION {
            confidence += 0.2;
        }
        let confidence = confidence.min(1.0);

        let strong = strength > self.config.strong_adx && di_agrees;
        let direction = if separation.abs() < SIDEWAYS_SEPARATION {
            TrendDirection::Sideways
        } else if separation > 0.0 {
            if strong {
                TrendDirection::StrongUp
            } else {
                TrendDirection::ModerateUp
            }
        } else if strong {
            TrendDirection::StrongDown
        } else {
            TrendDirection::ModerateDown
        };

        let signal = TrendSignal {
            direction,
            strength,
            confidence,
            reason: format!(
                "ema {:.4}/{:.4} (sep {:.4}), adx {:.1}, +di {:.1}, -di {:.1}",
                fast, slow, separation, di.adx, di.plus_di, di.minus_di
            ),
            computed_at: Utc::now(),
        };

        debug!(
            direction = ?signal.direction,
            strength = signal.strength,
            confidence = signal.confidence,
            "Trend assessed"
        );

        signal
    }

    /// The override this signal applies to an unrestricted risk state.
    ///
    /// Returns `None` unless the trend is strong *and* confident; the
    /// caller composes the result via [`RiskState::narrowed_by`], which
    /// guarantees the override can only add restriction.
    pub fn override_state(&self, signal: &TrendSignal) -> Option<RiskState> {
        if signal.strength <= self.config.strong_adx
            || signal.confidence <= self.config.min_confidence
        {
            return None;
        }

        match signal.direction {
            // Selling into a strong uptrend forfeits the move
            TrendDirection::StrongUp => Some(RiskState::AllowBuyOnly),
            // Buying into a strong downtrend catches the knife
            TrendDirection::StrongDown => Some(RiskState::AllowSellOnly),
            _ => None,
        }
    }
}

//! Hybrid volatility estimation.
//!
//! Blends an exponentially-weighted variance estimate (reacts quickly to
//! the most recent moves) with an equal-weighted rolling estimate over a
//! longer span (anchors the figure against one-off spikes). The blend
//! ratio is a fixed configuration constant.

use crate::error::EngineError;

/// Parameters for the hybrid estimator.
#[derive(Debug, Clone)]
pub struct VolatilityEstimator {
    /// EWMA decay factor (RiskMetrics-style, e.g. 0.94).
    lambda: f64,
    /// Rolling window length in return samples.
    window: usize,
    /// Weight of the EWMA estimate in the blend, in [0,1].
    blend: f64,
    /// Minimum number of *price* samples required.
    min_samples: usize,
}

impl VolatilityEstimator {
    pub fn new(lambda: f64, window: usize, blend: f64, min_samples: usize) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
            window: window.max(2),
            blend: blend.clamp(0.0, 1.0),
            min_samples: min_samples.max(3),
        }
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Estimate per-period volatility from an ordered close-price series
    /// (oldest first). Returns the blended standard deviation of log
    /// returns as a non-negative fraction.
    ///
    /// The estimator performs no I/O and no retries; starved input yields
    /// `InsufficientData` and the caller keeps its last-known-good value.
    pub fn estimate(&self, closes: &[f64]) -> Result<f64, EngineError> {
        if closes.len() < self.min_samples {
            return Err(EngineError::InsufficientData {
                have: closes.len(),
                need: self.min_samples,
            });
        }

        let returns = log_returns(closes);
        if returns.len() < 2 {
            return Err(EngineError::InsufficientData {
                have: closes.len(),
                need: self.min_samples,
            });
        }

        let ewma = self.ewma_volatility(&returns);
        let rolling = self.rolling_volatility(&returns);

        Ok((self.blend * ewma + (1.0 - self.blend) * rolling).max(0.0))
    }

    /// EWMA variance folded oldest→newest so the last return carries the
    /// highest weight.
    fn ewma_volatility(&self, returns: &[f64]) -> f64 {
        let seed = returns[0] * returns[0];
        let variance = returns[1..]
            .iter()
            .fold(seed, |var, &r| self.lambda * var + (1.0 - self.lambda) * r * r);
        variance.sqrt()
    }

    /// Equal-weighted sample standard deviation over the last `window`
    /// returns (or all of them when fewer are available).
    fn rolling_volatility(&self, returns: &[f64]) -> f64 {
        let tail = &returns[returns.len().saturating_sub(self.window)..];
        let n = tail.len() as f64;
        let mean = tail.iter().sum::<f64>() / n;
        let variance = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    }
}

impl Default for VolatilityEstimator {
    fn default() -> Self {
        Self::new(0.94, 20, 0.6, 10)
    }
}

/// Log returns of consecutive closes; non-positive prices are skipped.
fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_samples() {
        let estimator = VolatilityEstimator::default();
        let err = estimator.estimate(&[600.0, 601.0]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData { have: 2, need: 10 }
        ));
    }

    #[test]
    fn test_flat_prices_zero_volatility() {
        let estimator = VolatilityEstimator::default();
        let closes = vec![600.0; 30];
        let vol = estimator.estimate(&closes).unwrap();
        assert!(vol.abs() < 1e-12);
    }

    #[test]
    fn test_choppier_series_higher_volatility() {
        let estimator = VolatilityEstimator::default();

        let calm: Vec<f64> = (0..40)
            .map(|i| 600.0 * (1.0 + 0.001 * ((i % 2) as f64 - 0.5)))
            .collect();
        let wild: Vec<f64> = (0..40)
            .map(|i| 600.0 * (1.0 + 0.04 * ((i % 2) as f64 - 0.5)))
            .collect();

        let calm_vol = estimator.estimate(&calm).unwrap();
        let wild_vol = estimator.estimate(&wild).unwrap();
        assert!(wild_vol > calm_vol * 5.0);
    }

    #[test]
    fn test_ewma_blend_reacts_to_recent_spike() {
        // Same overall history, spike placed at the end vs the start:
        // the EWMA leg must weigh the recent spike higher.
        let mut spike_early = vec![600.0; 30];
        spike_early[1] = 700.0;
        spike_early[2] = 600.0;

        let mut spike_late = vec![600.0; 30];
        spike_late[27] = 700.0;
        spike_late[28] = 600.0;

        let estimator = VolatilityEstimator::new(0.9, 20, 1.0, 10);
        let early = estimator.estimate(&spike_early).unwrap();
        let late = estimator.estimate(&spike_late).unwrap();
        assert!(late > early);
    }

    #[test]
    fn test_non_positive_prices_skipped() {
        let estimator = VolatilityEstimator::new(0.94, 20, 0.6, 5);
        let closes = vec![600.0, 0.0, 601.0, 600.5, 602.0, 601.0, 600.0];
        // Still estimates from the valid pairs instead of producing NaN
        let vol = estimator.estimate(&closes).unwrap();
        assert!(vol.is_finite());
    }
}

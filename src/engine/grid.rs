//! Volatility → grid size mapping.
//!
//! The grid percentage follows a continuous linear function of the hybrid
//! volatility estimate, smoothed over the last few samples and clamped to
//! the configured bounds. Sub-threshold adjustments are suppressed so the
//! grid does not oscillate between nearly identical sizes.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::GridConfig;
use crate::utils::decimal::from_f64;

/// Maps volatility estimates to a bounded grid percentage.
pub struct GridSizer {
    config: GridConfig,
    /// Recent raw volatility samples for smoothing.
    samples: VecDeque<f64>,
}

impl GridSizer {
    pub fn new(config: GridConfig) -> Self {
        let capacity = config.smoothing_window.max(1);
        Self {
            config,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Feed a fresh volatility estimate and propose a new grid size.
    ///
    /// Returns `Some(new_grid)` when the change against `current` exceeds
    /// the minimum adjustment step, `None` when the move is suppressed.
    /// The returned value is always within `[min_grid_pct, max_grid_pct]`.
    pub fn propose(&mut self, volatility: f64, current: Decimal) -> Option<Decimal> {
        self.push_sample(volatility);
        let smoothed = self.smoothed_volatility();

        let raw = self.config.base_grid_pct_f64()
            + self.config.volatility_sensitivity * (smoothed - self.config.center_volatility);

        let clamped = from_f64(raw, 6)
            .clamp(self.config.min_grid_pct, self.config.max_grid_pct);

        let delta = (clamped - current).abs();
        if delta < self.config.min_adjust_step {
            debug!(
                %current,
                proposed = %clamped,
                step = %self.config.min_adjust_step,
                "Grid adjustment below minimum step, suppressed"
            );
            return None;
        }

        debug!(
            volatility,
            smoothed,
            %current,
            proposed = %clamped,
            "Grid size adjustment proposed"
        );
        Some(clamped)
    }

    fn push_sample(&mut self, volatility: f64) {
        self.samples.push_back(volatility.max(0.0));
        while self.samples.len() > self.config.smoothing_window.max(1) {
            self.samples.pop_front();
        }
    }

    /// Simple moving average over the retained samples.
    fn smoothed_volatility(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> GridConfig {
        GridConfig {
            base_grid_pct: dec!(0.02),
            min_grid_pct: dec!(0.01),
            max_grid_pct: dec!(0.04),
            volatility_sensitivity: 0.5,
            center_volatility: 0.02,
            min_adjust_step: dec!(0.001),
            smoothing_window: 3,
            auto_rebase_drift_pct: None,
        }
    }

    #[test]
    fn test_center_volatility_yields_base_grid() {
        let mut sizer = GridSizer::new(test_config());
        let grid = sizer.propose(0.02, dec!(0.015)).unwrap();
        assert_eq!(grid, dec!(0.02));
    }

    #[test]
    fn test_grid_stays_within_bounds_for_any_volatility() {
        let config = test_config();
        for vol in [0.0, 0.001, 0.02, 0.10, 1.0, 50.0] {
            let mut sizer = GridSizer::new(config.clone());
            if let Some(grid) = sizer.propose(vol, dec!(0.0)) {
                assert!(grid >= config.min_grid_pct, "vol={vol} grid={grid}");
                assert!(grid <= config.max_grid_pct, "vol={vol} grid={grid}");
            }
        }
    }

    #[test]
    fn test_small_delta_suppressed() {
        let mut sizer = GridSizer::new(test_config());
        // Center volatility proposes exactly the base grid; starting from
        // a grid 0.05pp away, the move is under the 0.1pp step
        assert!(sizer.propose(0.02, dec!(0.0205)).is_none());
        // From further away the same proposal goes through
        assert!(sizer.propose(0.02, dec!(0.015)).is_some());
    }

    #[test]
    fn test_smoothing_dampens_a_single_spike() {
        let mut smoothed = GridSizer::new(test_config());
        smoothed.propose(0.02, dec!(0.02));
        smoothed.propose(0.02, dec!(0.02));
        // One elevated sample averaged over the window proposes less than
        // the same sample alone would
        let with_history = smoothed.propose(0.06, dec!(0.0)).unwrap();

        let mut fresh = GridSizer::new(test_config());
        let alone = fresh.propose(0.06, dec!(0.0)).unwrap();

        assert!(with_history < alone);
    }

    #[test]
    fn test_high_volatility_widens_low_narrows() {
        let mut sizer = GridSizer::new(test_config());
        let wide = sizer.propose(0.05, dec!(0.0)).unwrap();

        let mut sizer = GridSizer::new(test_config());
        let narrow = sizer.propose(0.001, dec!(0.04)).unwrap();

        assert!(wide > dec!(0.02));
        assert!(narrow < dec!(0.02));
    }
}

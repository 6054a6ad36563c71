//! Band computation and signal classification.
//!
//! Primary triggers fire when price leaves the symmetric band around the
//! base price. With secondary triggers enabled, a band crossing arms an
//! extremum tracker instead: the sell waits for a pullback from the local
//! high, the buy for a rebound off the local low, capturing a better fill
//! on momentum moves.

use rust_decimal::Decimal;
use tracing::debug;

use crate::utils::decimal::safe_div;

/// Signal produced by one trigger evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridSignal {
    Buy,
    Sell,
    None,
}

/// Upper/lower trigger prices derived from the base price and grid size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerBands {
    pub upper: Decimal,
    pub lower: Decimal,
}

impl TriggerBands {
    /// Symmetric half-grid bands: `base × (1 ± grid/2)`.
    pub fn from_grid(base_price: Decimal, grid_pct: Decimal) -> Self {
        let half = grid_pct / Decimal::TWO;
        Self {
            upper: base_price * (Decimal::ONE + half),
            lower: base_price * (Decimal::ONE - half),
        }
    }
}

/// Armed state for the secondary (pullback/rebound) triggers.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Armed {
    /// Price rose through the upper band; tracking the local high.
    SellAbove { high: Decimal },
    /// Price fell through the lower band; tracking the local low.
    BuyBelow { low: Decimal },
}

/// Classifies the current price against the grid bands.
pub struct TriggerDetector {
    /// Retrace fraction required to fire an armed trigger; `None`
    /// disables the secondary triggers entirely.
    retrace_pct: Option<Decimal>,
    armed: Option<Armed>,
}

impl TriggerDetector {
    /// Immediate-fire detector (no secondary triggers).
    pub fn immediate() -> Self {
        Self {
            retrace_pct: None,
            armed: None,
        }
    }

    /// Detector with pullback-sell / rebound-buy enabled.
    pub fn with_retrace(retrace_pct: Decimal) -> Self {
        Self {
            retrace_pct: Some(retrace_pct),
            armed: None,
        }
    }

    /// Evaluate the current price against the grid.
    pub fn evaluate(
        &mut self,
        base_price: Decimal,
        grid_pct: Decimal,
        price: Decimal,
    ) -> (TriggerBands, GridSignal) {
        let bands = TriggerBands::from_grid(base_price, grid_pct);

        let signal = match self.retrace_pct {
            None => Self::classify(&bands, price),
            Some(retrace) => self.evaluate_armed(&bands, price, retrace),
        };

        if signal != GridSignal::None {
            debug!(
                %price,
                upper = %bands.upper,
                lower = %bands.lower,
                ?signal,
                "Grid trigger fired"
            );
        }

        (bands, signal)
    }

    /// Reset any armed secondary trigger (after a fill or rebase).
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    fn classify(bands: &TriggerBands, price: Decimal) -> GridSignal {
        if price >= bands.upper {
            GridSignal::Sell
        } else if price <= bands.lower {
            GridSignal::Buy
        } else {
            GridSignal::None
        }
    }

    fn evaluate_armed(
        &mut self,
        bands: &TriggerBands,
        price: Decimal,
        retrace: Decimal,
    ) -> GridSignal {
        match self.armed {
            None => {
                match Self::classify(bands, price) {
                    GridSignal::Sell => {
                        self.armed = Some(Armed::SellAbove { high: price });
                        debug!(%price, upper = %bands.upper, "Pullback sell armed");
                    }
                    GridSignal::Buy => {
                        self.armed = Some(Armed::BuyBelow { low: price });
                        debug!(%price, lower = %bands.lower, "Rebound buy armed");
                    }
                    GridSignal::None => {}
                }
                GridSignal::None
            }
            Some(Armed::SellAbove { high }) => {
                if price > high {
                    self.armed = Some(Armed::SellAbove { high: price });
                    return GridSignal::None;
                }
                let pullback = safe_div(high - price, high);
                if pullback >= retrace {
                    self.armed = None;
                    return GridSignal::Sell;
                }
                // A full retreat inside the band disarms without a trade
                if price < bands.lower {
                    self.armed = Some(Armed::BuyBelow { low: price });
                }
                GridSignal::None
            }
            Some(Armed::BuyBelow { low }) => {
                if price < low {
                    self.armed = Some(Armed::BuyBelow { low: price });
                    return GridSignal::None;
                }
                let rebound = safe_div(price - low, low);
                if rebound >= retrace {
                    self.armed = None;
                    return GridSignal::Buy;
                }
                if price > bands.upper {
                    self.armed = Some(Armed::SellAbove { high: price });
                }
                GridSignal::None
            }
        }
    }
}

//! Technical indicator primitives for the trend overseer.
//!
//! Wilder-style smoothing throughout; all functions return `None` rather
//! than a partial answer when the history is too short.

/// Latest simple moving average over `period` values.
pub fn sma_last(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values[values.len() - period..].iter().sum();
    Some(sum / period as f64)
}

/// Latest exponential moving average over the full series.
///
/// Seeded with the SMA of the first `period` values, then folded forward
/// with the standard 2/(n+1) multiplier.
pub fn ema_last(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;

    Some(
        values[period..]
            .iter()
            .fold(seed, |ema, &v| (v - ema) * multiplier + ema),
    )
}

/// True range series; the first element falls back to high − low.
fn true_ranges(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..high.len())
        .map(|i| {
            if i == 0 {
                high[0] - low[0]
            } else {
                let hl = high[i] - low[i];
                let hc = (high[i] - close[i - 1]).abs();
                let lc = (low[i] - close[i - 1]).abs();
                hl.max(hc).max(lc)
            }
        })
        .collect()
}

/// Latest average true range (Wilder smoothing).
pub fn atr_last(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Option<f64> {
    if period == 0 || high.len() < period + 1 {
        return None;
    }
    let tr = true_ranges(high, low, close);
    wilder_last(&tr[1..], period)
}

/// Wilder smoothing: seed with the mean of the first `period` values,
/// then `prev + (v − prev)/period`.
fn wilder_last(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    Some(
        values[period..]
            .iter()
            .fold(seed, |prev, &v| prev + (v - prev) / period as f64),
    )
}

fn wilder_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut current: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out.push(current);
    for &v in &values[period..] {
        current += (v - current) / period as f64;
        out.push(current);
    }
    out
}

/// Directional movement readout: ±DI and ADX.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalIndex {
    pub plus_di: f64,
    pub minus_di: f64,
    pub adx: f64,
}

/// Compute the latest ±DI/ADX from OHLC history.
///
/// Requires roughly `2 × period` bars: one period to seed the smoothed
/// directional movement, another to seed the ADX average of DX.
pub fn directional_index(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
) -> Option<DirectionalIndex> {
    let n = high.len();
    if period == 0 || n < 2 * period + 1 || low.len() != n || close.len() != n {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    for i in 1..n {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let tr = true_ranges(high, low, close);
    let smoothed_tr = wilder_series(&tr[1..], period);
    let smoothed_plus = wilder_series(&plus_dm, period);
    let smoothed_minus = wilder_series(&minus_dm, period);

    let len = smoothed_tr
        .len()
        .min(smoothed_plus.len())
        .min(smoothed_minus.len());
    if len == 0 {
        return None;
    }

    let mut dx = Vec::with_capacity(len);
    let mut last_plus_di = 0.0;
    let mut last_minus_di = 0.0;
    for i in 0..len {
        if smoothed_tr[i] <= f64::EPSILON {
            dx.push(0.0);
            continue;
        }
        let pdi = 100.0 * smoothed_plus[i] / smoothed_tr[i];
        let mdi = 100.0 * smoothed_minus[i] / smoothed_tr[i];
        last_plus_di = pdi;
        last_minus_di = mdi;
        let sum = pdi + mdi;
        dx.push(if sum > 0.0 {
            100.0 * (pdi - mdi).abs() / sum
        } else {
            0.0
        });
    }

    let adx = wilder_last(&dx, period)?;

    Some(DirectionalIndex {
        plus_di: last_plus_di,
        minus_di: last_minus_di,
        adx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, start: f64, step: f64) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn test_sma_last() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma_last(&values, 3), Some(4.0));
        assert_eq!(sma_last(&values, 5), Some(3.0));
        assert_eq!(sma_last(&values, 6), None);
    }

    #[test]
    fn test_ema_converges_toward_recent_values() {
        // Flat series: EMA equals the level
        let flat = vec![10.0; 30];
        let ema = ema_last(&flat, 10).unwrap();
        assert!((ema - 10.0).abs() < 1e-9);

        // Rising series: EMA above SMA of the full series
        let rising = ramp(30, 100.0, 1.0);
        let ema = ema_last(&rising, 10).unwrap();
        let sma_full: f64 = rising.iter().sum::<f64>() / 30.0;
        assert!(ema > sma_full);
    }

    #[test]
    fn test_atr_on_constant_range() {
        // Bars with constant 2.0 high-low range and no gaps
        let n = 20;
        let close: Vec<f64> = vec![100.0; n];
        let high: Vec<f64> = vec![101.0; n];
        let low: Vec<f64> = vec![99.0; n];

        let atr = atr_last(&high, &low, &close, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_adx_strong_in_sustained_uptrend() {
        let n = 60;
        let close = ramp(n, 100.0, 1.0);
        let high: Vec<f64> = close.iter().map(|c| c + 0.5).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 0.5).collect();

        let di = directional_index(&high, &low, &close, 14).unwrap();
        assert!(di.plus_di > di.minus_di);
        assert!(di.adx > 50.0, "adx was {}", di.adx);
    }

    #[test]
    fn test_adx_weak_in_oscillation() {
        // Price ping-pongs in a tight band: no sustained direction
        let n = 80;
        let close: Vec<f64> = (0..n)
            .map(|i| 100.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let high: Vec<f64> = close.iter().map(|c| c + 1.0).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 1.0).collect();

        let di = directional_index(&high, &low, &close, 14).unwrap();
        assert!(di.adx < 25.0, "adx was {}", di.adx);
    }

    #[test]
    fn test_insufficient_history_returns_none() {
        let short = vec![1.0, 2.0, 3.0];
        assert!(ema_last(&short, 10).is_none());
        assert!(atr_last(&short, &short, &short, 14).is_none());
        assert!(directional_index(&short, &short, &short, 14).is_none());
    }
}

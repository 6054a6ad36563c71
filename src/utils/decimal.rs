//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Round to a number of decimal places (banker-free, half-up).
pub fn round_to_decimals(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp(decimals)
}

/// Round *down* to a number of decimal places.
///
/// Order quantities must never round up past the available balance.
pub fn round_down_to_decimals(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, rust_decimal::RoundingStrategy::ToZero)
}

/// Division that yields zero instead of panicking on a zero divisor.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Signed fractional change from `from` to `to` (0.01 = +1%).
pub fn fractional_change(from: Decimal, to: Decimal) -> Decimal {
    safe_div(to - from, from)
}

/// Lossy conversion to f64 for the statistical estimators.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Conversion back from estimator output, rounded to a sane scale.
pub fn from_f64(value: f64, decimals: u32) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or(Decimal::ZERO)
        .round_dp(decimals)
}

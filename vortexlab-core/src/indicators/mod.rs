//! Indicator implementations and the bar-close indicator engine.
//!
//! Indicators are pure functions: candle history in, numeric series out.
//! The engine recomputes them over a trailing window each time a bar closes.
//!
//! Vortex is exposed as two named instances (one per line), keeping the
//! single-series `Indicator` trait unchanged.

pub mod atr;
pub mod choppiness;
pub mod ema;
pub mod engine;
pub mod macd;
pub mod vortex;

pub use atr::{true_range, Atr};
pub use choppiness::Choppiness;
pub use ema::Ema;
pub use engine::{IndicatorEngine, IndicatorReading, IndicatorSnapshot};
pub use macd::MacdHistogram;
pub use vortex::{Vortex, VortexLine};

use crate::domain::Candle;

/// Trait for indicators.
///
/// Indicators take a full candle series and produce a numeric output series of
/// the same length. The first `lookback()` values are `f64::NAN` (warmup).
///
/// # Look-ahead contamination guard
/// No indicator value at bar t may depend on price data from bar t+1 or later.
/// Every indicator must pass the truncated-vs-full series test.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "ema_21", "vi_plus_21").
    fn name(&self) -> &str;

    /// Number of leading NaN values in the output.
    fn lookback(&self) -> usize;

    /// Compute the indicator for the entire candle series.
    fn compute(&self, candles: &[Candle]) -> Vec<f64>;
}

/// Sum of the trailing `period` values ending at each index.
/// NaN until a full window of non-NaN values is available.
pub(crate) fn rolling_sum(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 {
        return result;
    }
    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = window.iter().sum();
    }
    result
}

/// Create synthetic candles from close prices for testing.
///
/// open = prev_close (or close for the first bar), high = max(open,close) + 1.0,
/// low = min(open,close) - 1.0, five-minute spacing from 09:15.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            make_ohlc(i, open, open.max(close) + 1.0, open.min(close) - 1.0, close)
        })
        .collect()
}

/// One synthetic candle at bar slot `i`.
#[cfg(test)]
pub fn make_ohlc(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    let base = chrono::NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(9, 15, 0)
        .unwrap();
    Candle::new(
        base + chrono::Duration::minutes(5 * i as i64),
        open,
        high,
        low,
        close,
        1000.0,
    )
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_sum_basic() {
        let s = rolling_sum(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(s[0].is_nan());
        assert_approx(s[1], 3.0, DEFAULT_EPSILON);
        assert_approx(s[3], 7.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rolling_sum_skips_windows_with_nan() {
        let s = rolling_sum(&[f64::NAN, 2.0, 3.0, 4.0], 2);
        assert!(s[1].is_nan());
        assert_approx(s[2], 5.0, DEFAULT_EPSILON);
    }
}

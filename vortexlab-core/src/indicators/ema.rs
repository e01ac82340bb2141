//! Exponential Moving Average (EMA).
//!
//! Recursive from the very first close, with no SMA seed:
//! EMA[0] = close[0], EMA[t] = alpha * close[t] + (1 - alpha) * EMA[t-1],
//! alpha = 2 / (period + 1).
//!
//! The first `period - 1` values are reported as NaN so a reading never
//! uses an average built from less than one full period.

use super::Indicator;
use crate::domain::Candle;

/// Exponentially weighted mean of `values`, seeded with `values[0]`.
/// A NaN input makes every later output NaN.
pub(crate) fn ewm(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut acc: Option<f64> = None;
    for &v in values {
        let next = match acc {
            _ if v.is_nan() => f64::NAN,
            None => v,
            Some(prev) => alpha * v + (1.0 - alpha) * prev,
        };
        acc = Some(next);
        out.push(next);
    }
    out
}

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            name: format!("ema_{period}"),
        }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let mut out = ewm(&closes, self.period);
        for v in out.iter_mut().take(self.lookback()) {
            *v = f64::NAN;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_candles, DEFAULT_EPSILON};

    #[test]
    fn period_one_tracks_close() {
        let out = Ema::new(1).compute(&make_candles(&[10.0, 11.0, 12.5]));
        assert_approx(out[0], 10.0, DEFAULT_EPSILON);
        assert_approx(out[2], 12.5, DEFAULT_EPSILON);
    }

    #[test]
    fn seeded_from_first_close() {
        // alpha = 0.5: 1, 1.5, 2.25, 3.125, 4.0625
        let out = Ema::new(3).compute(&make_candles(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_approx(out[2], 2.25, DEFAULT_EPSILON);
        assert_approx(out[3], 3.125, DEFAULT_EPSILON);
        assert_approx(out[4], 4.0625, DEFAULT_EPSILON);
    }

    #[test]
    fn nan_close_taints_the_rest() {
        let out = ewm(&[1.0, f64::NAN, 3.0], 3);
        assert_approx(out[0], 1.0, DEFAULT_EPSILON);
        assert!(out[1].is_nan() && out[2].is_nan());
    }

    #[test]
    fn short_history_is_all_nan() {
        let out = Ema::new(21).compute(&make_candles(&[1.0, 2.0]));
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn constant_series_stays_flat() {
        let ema = Ema::new(21);
        assert_eq!(ema.lookback(), 20);
        let out = ema.compute(&make_candles(&[50.0; 30]));
        assert_approx(out[29], 50.0, DEFAULT_EPSILON);
    }
}

//! Choppiness Index (CHOP).
//!
//! CHOP[t] = 100 * log10( sum(TR, period) / (max(high, period) - min(low, period)) ) / log10(period)
//! Range 0..100: low values mean a trending market, high values a sideways one.
//! A flat window (max high == min low) is undefined and reported as NaN.
//! Lookback: period (TR[0] has no previous close).

use super::atr::true_range_from_second;
use super::{rolling_sum, Indicator};
use crate::domain::Candle;

#[derive(Debug, Clone)]
pub struct Choppiness {
    period: usize,
    name: String,
}

impl Choppiness {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "Choppiness period must be >= 2");
        Self {
            period,
            name: format!("chop_{period}"),
        }
    }
}

impl Indicator for Choppiness {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let n = candles.len();
        let tr_sum = rolling_sum(&true_range_from_second(candles), self.period);
        let log_period = (self.period as f64).log10();
        let mut result = vec![f64::NAN; n];

        for i in 0..n {
            if tr_sum[i].is_nan() {
                continue;
            }
            let window = &candles[i + 1 - self.period..=i];
            let max_high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
            let min_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            let range = max_high - min_low;
            if range <= 0.0 {
                continue;
            }
            result[i] = 100.0 * (tr_sum[i] / range).log10() / log_period;
        }

        result
    }
}

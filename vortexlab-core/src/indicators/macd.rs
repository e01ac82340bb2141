//! MACD histogram.
//!
//! MACD = EMA(fast) - EMA(slow) of close; signal = EMA(signal) of MACD;
//! histogram = MACD - signal. All three averages are seeded from their first
//! input, like [`Ema`](super::Ema).
//! Lookback: slow + signal - 2.

use super::ema::ewm;
use super::Indicator;
use crate::domain::Candle;

#[derive(Debug, Clone)]
pub struct MacdHistogram {
    fast: usize,
    slow: usize,
    signal: usize,
    name: String,
}

impl MacdHistogram {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast >= 1 && signal >= 1, "MACD periods must be >= 1");
        assert!(fast < slow, "MACD fast period must be shorter than slow");
        Self {
            fast,
            slow,
            signal,
            name: format!("macd_hist_{fast}_{slow}_{signal}"),
        }
    }
}

impl Indicator for MacdHistogram {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.slow + self.signal - 2
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast = ewm(&closes, self.fast);
        let slow = ewm(&closes, self.slow);
        let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = ewm(&macd, self.signal);

        let lookback = self.lookback();
        macd.iter()
            .zip(&signal)
            .enumerate()
            .map(|(i, (m, s))| if i < lookback { f64::NAN } else { m - s })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_candles, DEFAULT_EPSILON};

    #[test]
    fn flat_series_has_zero_histogram() {
        let out = MacdHistogram::new(3, 6, 3).compute(&make_candles(&[100.0; 20]));
        assert!(out[..7].iter().all(|v| v.is_nan()));
        assert_approx(out[19], 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn turn_down_goes_negative() {
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..6).map(|i| 128.0 - 3.0 * i as f64));
        let out = MacdHistogram::new(3, 6, 3).compute(&make_candles(&closes));
        assert!(out[29] > 0.0, "rising leg: {}", out[29]);
        assert!(out[35] < 0.0, "falling leg: {}", out[35]);
    }
}

//! Vortex Indicator (VI+ / VI-).
//!
//! VM+[t] = |high[t] - low[t-1]|
//! VM-[t] = |low[t] - high[t-1]|
//! VI+[t] = sum(VM+, period) / sum(TR, period)
//! VI-[t] = sum(VM-, period) / sum(TR, period)
//! Lookback: period (bar 0 has no previous bar).

use super::atr::true_range_from_second;
use super::{rolling_sum, Indicator};
use crate::domain::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VortexLine {
    Plus,
    Minus,
}

#[derive(Debug, Clone)]
pub struct Vortex {
    period: usize,
    line: VortexLine,
    name: String,
}

impl Vortex {
    pub fn new(period: usize, line: VortexLine) -> Self {
        assert!(period >= 1, "Vortex period must be >= 1");
        let prefix = match line {
            VortexLine::Plus => "vi_plus",
            VortexLine::Minus => "vi_minus",
        };
        Self {
            period,
            line,
            name: format!("{prefix}_{period}"),
        }
    }
}

/// Both vortex lines in one pass.
pub fn vortex_lines(candles: &[Candle], period: usize) -> (Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut vm_plus = vec![f64::NAN; n];
    let mut vm_minus = vec![f64::NAN; n];
    for i in 1..n {
        vm_plus[i] = (candles[i].high - candles[i - 1].low).abs();
        vm_minus[i] = (candles[i].low - candles[i - 1].high).abs();
    }
    let tr_sum = rolling_sum(&true_range_from_second(candles), period);
    let plus_sum = rolling_sum(&vm_plus, period);
    let minus_sum = rolling_sum(&vm_minus, period);

    let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { f64::NAN };
    let plus = (0..n).map(|i| ratio(plus_sum[i], tr_sum[i])).collect();
    let minus = (0..n).map(|i| ratio(minus_sum[i], tr_sum[i])).collect();
    (plus, minus)
}

impl Indicator for Vortex {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let (plus, minus) = vortex_lines(candles, self.period);
        match self.line {
            VortexLine::Plus => plus,
            VortexLine::Minus => minus,
        }
    }
}

//! Bar-close indicator engine.
//!
//! Recomputes EMA, both Vortex lines, Choppiness and the MACD histogram over
//! the trailing window of closed bars. No state is kept between calls: the reading for a bar is a pure
//! function of the window that ends at that bar.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::{vortex::vortex_lines, Atr, Choppiness, Ema, Indicator, MacdHistogram};
use crate::config::IndicatorConfig;
use crate::data::CandleSeries;
use crate::domain::Candle;

/// Indicator values at one closed bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    /// Index of the bar in its series.
    pub bar_index: usize,
    pub open_time: NaiveDateTime,
    pub close: f64,
    pub ema: f64,
    pub vortex_plus: f64,
    pub vortex_minus: f64,
    /// Vortex lines one bar earlier, for gap-widening checks.
    pub prev_vortex_plus: f64,
    pub prev_vortex_minus: f64,
    pub choppiness: f64,
    /// NaN until the MACD has a full lookback; readiness does not wait on it.
    pub macd_histogram: f64,
}

impl IndicatorSnapshot {
    pub fn vortex_gap(&self) -> f64 {
        self.vortex_plus - self.vortex_minus
    }

    pub fn prev_vortex_gap(&self) -> f64 {
        self.prev_vortex_plus - self.prev_vortex_minus
    }
}

/// Either a full snapshot or an explicit "not ready".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorReading {
    NotReady { bars: usize, required: usize },
    Ready(IndicatorSnapshot),
}

impl IndicatorReading {
    pub fn is_ready(&self) -> bool {
        matches!(self, IndicatorReading::Ready(_))
    }

    pub fn snapshot(&self) -> Option<&IndicatorSnapshot> {
        match self {
            IndicatorReading::Ready(s) => Some(s),
            IndicatorReading::NotReady { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    ema: Ema,
    vortex_period: usize,
    choppiness: Choppiness,
    macd: MacdHistogram,
    atr: Atr,
    window: usize,
    required: usize,
}

impl IndicatorEngine {
    pub fn new(config: &IndicatorConfig) -> Self {
        let required = config
            .ema_period
            .max(config.vortex_period + 2)
            .max(config.choppiness_period + 1);
        Self {
            ema: Ema::new(config.ema_period),
            vortex_period: config.vortex_period,
            choppiness: Choppiness::new(config.choppiness_period),
            macd: MacdHistogram::new(config.macd_fast, config.macd_slow, config.macd_signal),
            atr: Atr::new(config.atr_period),
            window: config.window.max(required),
            required,
        }
    }

    /// Closed bars needed before a reading can be ready.
    pub fn required_bars(&self) -> usize {
        self.required
    }

    pub fn on_bar_close(&self, series: &CandleSeries) -> IndicatorReading {
        let window = series.tail(self.window);
        let first_index = series.len() - window.len();
        self.evaluate(window, first_index)
    }

    /// Reading at the last candle of `candles`; `first_index` is the series
    /// index of `candles[0]`.
    pub fn evaluate(&self, candles: &[Candle], first_index: usize) -> IndicatorReading {
        let n = candles.len();
        let bars = first_index + n;
        if n < self.required {
            return IndicatorReading::NotReady {
                bars,
                required: self.required,
            };
        }

        let last = n - 1;
        let ema = self.ema.compute(candles)[last];
        let (plus, minus) = vortex_lines(candles, self.vortex_period);
        let chop = self.choppiness.compute(candles)[last];
        let macd_histogram = self.macd.compute(candles)[last];

        let values = [ema, plus[last], minus[last], plus[last - 1], minus[last - 1], chop];
        if values.iter().any(|v| !v.is_finite()) {
            return IndicatorReading::NotReady {
                bars,
                required: self.required,
            };
        }

        let bar = &candles[last];
        IndicatorReading::Ready(IndicatorSnapshot {
            bar_index: first_index + last,
            open_time: bar.open_time,
            close: bar.close,
            ema,
            vortex_plus: plus[last],
            vortex_minus: minus[last],
            prev_vortex_plus: plus[last - 1],
            prev_vortex_minus: minus[last - 1],
            choppiness: chop,
            macd_histogram,
        })
    }

    /// Volatility of a (traded) series for stop sizing and trailing.
    pub fn atr(&self, series: &CandleSeries) -> Option<f64> {
        self.atr.latest(series.tail(self.window))
    }
}

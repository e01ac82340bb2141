//! Candles, the fundamental market data unit, and the live tick.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// OHLCV bar keyed by its bar-start instant (exchange-local).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn new(
        open_time: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self { open_time, open, high, low, close, volume }
    }

    /// A bar opened by a single trade.
    pub fn from_price(open_time: NaiveDateTime, price: f64, volume: f64) -> Self {
        Self::new(open_time, price, price, price, price, volume)
    }

    /// Returns true if any OHLC field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }

    /// Fold a trade into this (open) bar.
    pub(crate) fn absorb_price(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }

    /// Fold a finer-grained bar into this (open) bar.
    pub(crate) fn absorb_bar(&mut self, other: &Candle) {
        self.high = self.high.max(other.high);
        self.low = self.low.min(other.low);
        self.close = other.close;
        self.volume += other.volume;
    }
}

/// Floor a timestamp onto the bar grid (`interval_minutes` counted from midnight).
pub fn bar_start(ts: NaiveDateTime, interval_minutes: u32) -> NaiveDateTime {
    let interval = interval_minutes.max(1);
    let minute_of_day = ts.hour() * 60 + ts.minute();
    let floored = minute_of_day - minute_of_day % interval;
    ts.date().and_time(chrono::NaiveTime::MIN) + Duration::minutes(i64::from(floored))
}

/// Latest trade for one instrument, as delivered by the feed.
///
/// Only the most recent tick per instrument is retained by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTick {
    pub instrument: String,
    pub ltp: f64,
    pub timestamp: NaiveDateTime,
    /// Traded quantity since the previous tick, when the feed reports it.
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub session_open: Option<f64>,
    #[serde(default)]
    pub session_high: Option<f64>,
    #[serde(default)]
    pub session_low: Option<f64>,
}

impl LiveTick {
    pub fn new(instrument: impl Into<String>, ltp: f64, timestamp: NaiveDateTime) -> Self {
        Self {
            instrument: instrument.into(),
            ltp,
            timestamp,
            volume: None,
            session_open: None,
            session_high: None,
            session_low: None,
        }
    }

    pub fn with_session(mut self, open: f64, high: f64, low: f64) -> Self {
        self.session_open = Some(open);
        self.session_high = Some(high);
        self.session_low = Some(low);
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

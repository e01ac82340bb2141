//! Append-only candle series with one mutable (open) bar.
//!
//! Closed bars are frozen: an update that belongs to a bar at or before the
//! last closed bar is stale and ignored. Crossing a bar boundary closes the
//! open bar and is the only call that reports `true`.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::domain::{bar_start, Candle, LiveTick};

/// One incremental update from the feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeriesUpdate {
    Tick {
        timestamp: NaiveDateTime,
        price: f64,
        volume: f64,
    },
    /// A completed bar at the feed's own (finer or equal) resolution.
    Bar(Candle),
}

impl SeriesUpdate {
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            SeriesUpdate::Tick { timestamp, .. } => *timestamp,
            SeriesUpdate::Bar(c) => c.open_time,
        }
    }

    fn open_candle(&self, open_time: NaiveDateTime) -> Candle {
        match *self {
            SeriesUpdate::Tick { price, volume, .. } => Candle::from_price(open_time, price, volume),
            SeriesUpdate::Bar(c) => Candle { open_time, ..c },
        }
    }

    fn fold_into(&self, bar: &mut Candle) {
        match self {
            SeriesUpdate::Tick { price, volume, .. } => bar.absorb_price(*price, *volume),
            SeriesUpdate::Bar(c) => bar.absorb_bar(c),
        }
    }
}

impl From<&LiveTick> for SeriesUpdate {
    fn from(tick: &LiveTick) -> Self {
        SeriesUpdate::Tick {
            timestamp: tick.timestamp,
            price: tick.ltp,
            volume: tick.volume.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandleSeries {
    instrument: String,
    interval_minutes: u32,
    closed: Vec<Candle>,
    open: Option<Candle>,
    stale_updates: u64,
}

impl CandleSeries {
    pub fn new(instrument: impl Into<String>, interval_minutes: u32) -> Self {
        Self {
            instrument: instrument.into(),
            interval_minutes,
            closed: Vec::new(),
            open: None,
            stale_updates: 0,
        }
    }

    /// Build a series of closed bars. Input is sorted; a later entry wins on a
    /// repeated `open_time`.
    pub fn from_candles(
        instrument: impl Into<String>,
        interval_minutes: u32,
        mut candles: Vec<Candle>,
    ) -> Self {
        candles.sort_by_key(|c| c.open_time);
        let mut closed: Vec<Candle> = Vec::with_capacity(candles.len());
        for c in candles {
            match closed.last_mut() {
                Some(last) if last.open_time == c.open_time => *last = c,
                _ => closed.push(c),
            }
        }
        Self::from_sorted(instrument, interval_minutes, closed)
    }

    /// Caller guarantees strictly increasing `open_time`.
    pub(crate) fn from_sorted(
        instrument: impl Into<String>,
        interval_minutes: u32,
        closed: Vec<Candle>,
    ) -> Self {
        debug_assert!(closed.windows(2).all(|w| w[0].open_time < w[1].open_time));
        Self {
            instrument: instrument.into(),
            interval_minutes,
            closed,
            open: None,
            stale_updates: 0,
        }
    }

    /// Apply one update. Returns true exactly when the update closed a bar.
    pub fn append_or_update(&mut self, update: SeriesUpdate) -> bool {
        let start = bar_start(update.timestamp(), self.interval_minutes);

        if let Some(last) = self.closed.last() {
            if start <= last.open_time {
                self.reject_stale(start);
                return false;
            }
        }

        match self.open.as_ref().map(|bar| bar.open_time) {
            None => {
                self.open = Some(update.open_candle(start));
                false
            }
            Some(open_time) if start == open_time => {
                if let Some(bar) = self.open.as_mut() {
                    update.fold_into(bar);
                }
                false
            }
            Some(open_time) if start < open_time => {
                self.reject_stale(start);
                false
            }
            Some(_) => {
                if let Some(finished) = self.open.replace(update.open_candle(start)) {
                    self.closed.push(finished);
                }
                true
            }
        }
    }

    fn reject_stale(&mut self, start: NaiveDateTime) {
        self.stale_updates += 1;
        debug!(
            instrument = %self.instrument,
            bar_start = %start,
            "ignoring update for a closed bar"
        );
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    /// Number of closed bars.
    pub fn len(&self) -> usize {
        self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
    }

    pub fn closed(&self) -> &[Candle] {
        &self.closed
    }

    /// The last `n` closed bars (fewer if the series is shorter).
    pub fn tail(&self, n: usize) -> &[Candle] {
        let start = self.closed.len().saturating_sub(n);
        &self.closed[start..]
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.closed.get(index)
    }

    pub fn last_closed(&self) -> Option<&Candle> {
        self.closed.last()
    }

    /// Index of the last closed bar.
    pub fn last_index(&self) -> Option<usize> {
        self.closed.len().checked_sub(1)
    }

    pub fn open_bar(&self) -> Option<&Candle> {
        self.open.as_ref()
    }

    pub fn index_of(&self, open_time: NaiveDateTime) -> Option<usize> {
        self.closed
            .binary_search_by_key(&open_time, |c| c.open_time)
            .ok()
    }

    /// The bar starting at `open_time`, closed or still open.
    pub fn bar_at(&self, open_time: NaiveDateTime) -> Option<&Candle> {
        match self.index_of(open_time) {
            Some(i) => self.closed.get(i),
            None => self.open.as_ref().filter(|b| b.open_time == open_time),
        }
    }

    pub fn stale_updates(&self) -> u64 {
        self.stale_updates
    }
}

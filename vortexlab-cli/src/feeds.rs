//! Feeds driven from files or a seeded random walk, plus the stdout sink.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, info};

use vortexlab_core::data::parse_timestamp;
use vortexlab_core::domain::{bar_start, Candle, Instrument, LiveTick};
use vortexlab_core::feed::{FeedEvent, FeedPublisher, MarketFeed};
use vortexlab_core::snapshot::{BotStateView, SnapshotSink};
use vortexlab_core::EngineError;

#[derive(Debug, Deserialize)]
struct TickRow {
    timestamp: String,
    instrument: String,
    ltp: f64,
    #[serde(default)]
    volume: Option<f64>,
}

/// Read `timestamp,instrument,ltp[,volume]` rows.
pub fn read_ticks(path: &Path) -> Result<Vec<LiveTick>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for row in reader.deserialize::<TickRow>() {
        let row = row.with_context(|| format!("reading {}", path.display()))?;
        let mut tick = LiveTick::new(row.instrument, row.ltp, parse_timestamp(&row.timestamp)?);
        tick.volume = row.volume;
        out.push(tick);
    }
    Ok(out)
}

/// Pushes a fixed list of events from its own thread, then raises `finished`.
pub struct ScriptedFeed {
    name: String,
    events: Vec<FeedEvent>,
    pace: Duration,
    finished: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScriptedFeed {
    pub fn new(name: impl Into<String>, events: Vec<FeedEvent>, pace: Duration) -> Self {
        Self {
            name: name.into(),
            events,
            pace,
            finished: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }
}

impl MarketFeed for ScriptedFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(
        &mut self,
        instruments: &[Instrument],
        publisher: FeedPublisher,
    ) -> Result<(), EngineError> {
        let wanted: Vec<String> = instruments.iter().map(|i| i.symbol.clone()).collect();
        let events: Vec<FeedEvent> = std::mem::take(&mut self.events)
            .into_iter()
            .filter(|e| e.instrument().map_or(true, |s| wanted.iter().any(|w| w == s)))
            .collect();
        let pace = self.pace;
        let finished = Arc::clone(&self.finished);
        let cancel = Arc::clone(&self.cancel);
        info!(feed = %self.name, events = events.len(), "feed subscribed");

        let handle = thread::Builder::new()
            .name("vortexlab-feed".into())
            .spawn(move || {
                for event in events {
                    if cancel.load(Ordering::Relaxed) || !publisher.publish(event) {
                        break;
                    }
                    if !pace.is_zero() {
                        thread::sleep(pace);
                    }
                }
                finished.store(true, Ordering::Release);
            })
            .map_err(|source| EngineError::Spawn { name: "feed", source })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!(feed = %self.name, "feed released");
        }
    }
}

/// Seeded random walk per instrument on a synthetic clock.
pub struct RandomWalk {
    rng: StdRng,
    volatility: f64,
}

impl RandomWalk {
    pub fn new(seed: u64, volatility: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            volatility,
        }
    }

    fn step(&mut self, price: f64, tick_size: f64) -> f64 {
        let drift: f64 = self.rng.gen_range(-1.0..1.0);
        let next = price * (1.0 + drift * self.volatility);
        let ticks = (next / tick_size).round().max(1.0);
        ticks * tick_size
    }

    /// `count` completed bars ending before `end`.
    pub fn history(
        &mut self,
        instrument: &Instrument,
        start_price: f64,
        end: NaiveDateTime,
        interval_minutes: u32,
        count: usize,
    ) -> Vec<Candle> {
        let step = chrono::Duration::minutes(i64::from(interval_minutes.max(1)));
        let first = bar_start(end, interval_minutes) - step * count as i32;
        let mut price = start_price;
        (0..count)
            .map(|i| {
                let open = price;
                let mut high = open;
                let mut low = open;
                for _ in 0..4 {
                    price = self.step(price, instrument.tick_size);
                    high = high.max(price);
                    low = low.min(price);
                }
                Candle::new(first + step * i as i32, open, high, low, price, 1.0)
            })
            .collect()
    }

    /// Ticks for every instrument every `every` from `start` for `duration`.
    pub fn ticks(
        &mut self,
        instruments: &[(Instrument, f64)],
        start: NaiveDateTime,
        every: chrono::Duration,
        duration: chrono::Duration,
    ) -> Vec<FeedEvent> {
        let mut prices: Vec<f64> = instruments.iter().map(|(_, p)| *p).collect();
        let mut out = Vec::new();
        let mut t = start;
        while t < start + duration {
            for (i, (inst, _)) in instruments.iter().enumerate() {
                prices[i] = self.step(prices[i], inst.tick_size);
                out.push(FeedEvent::Tick(
                    LiveTick::new(&inst.symbol, prices[i], t).with_volume(1.0),
                ));
            }
            t += every;
        }
        out
    }
}

/// Writes each snapshot as one JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> SnapshotSink for JsonLinesSink<W> {
    fn send(&mut self, view: &BotStateView) -> std::io::Result<()> {
        let line = view.to_json()?;
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

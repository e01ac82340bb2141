//! Point-in-time bot view and its broadcast loop.
//!
//! The consumer builds a [`BotStateView`] and swaps it into a
//! [`SnapshotCell`]. Readers clone an `Arc`, so the write side only ever
//! waits for a pointer swap. A [`SnapshotPublisher`] thread pushes the latest
//! view to a [`SnapshotSink`] on a fixed cadence and whenever it changes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{ExitReason, LiveTick, Position, PositionStatus, Signal};
use crate::engine::BotStatus;
use crate::error::EngineError;
use crate::indicators::IndicatorReading;
use crate::strategy::{GateState, PendingSignal};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionView {
    pub id: String,
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub status: PositionStatus,
    pub stop_price: f64,
    pub take_profit_price: f64,
    pub trailing_armed: bool,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
}

impl From<&Position> for PositionView {
    fn from(p: &Position) -> Self {
        Self {
            id: p.id.to_string(),
            symbol: p.symbol().to_string(),
            entry_price: p.entry_price,
            quantity: p.quantity,
            pnl: p.pnl(),
            status: p.status,
            stop_price: p.stop_price,
            take_profit_price: p.take_profit_price,
            trailing_armed: p.trailing_armed,
            exit_price: p.exit_price,
            exit_reason: p.exit_reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivePriceView {
    pub ltp: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
}

impl From<&LiveTick> for LivePriceView {
    fn from(t: &LiveTick) -> Self {
        Self {
            ltp: t.ltp,
            open: t.session_open,
            high: t.session_high,
            low: t.session_low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiState {
    pub last_signal: Signal,
    pub atm_strike: Option<f64>,
    pub pending_signal: Option<PendingSignal>,
}

/// Indicator values for display. `None` means "not ready", never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorView {
    pub ema: Option<f64>,
    pub vi_plus: Option<f64>,
    pub vi_minus: Option<f64>,
    pub choppiness: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub ready: bool,
}

impl From<&IndicatorReading> for IndicatorView {
    fn from(r: &IndicatorReading) -> Self {
        match r.snapshot() {
            Some(s) => Self {
                ema: Some(s.ema),
                vi_plus: Some(s.vortex_plus),
                vi_minus: Some(s.vortex_minus),
                choppiness: Some(s.choppiness),
                macd_histogram: Some(s.macd_histogram).filter(|v| v.is_finite()),
                ready: true,
            },
            None => Self::default(),
        }
    }
}

/// Everything an observer gets to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotStateView {
    pub bot_status: BotStatus,
    pub asset: String,
    /// RFC 3339 wall-clock time the view was assembled.
    pub timestamp: String,
    pub positions: Vec<PositionView>,
    pub live_prices: BTreeMap<String, LivePriceView>,
    pub ui_state: UiState,
    pub indicators: IndicatorView,
    pub gate_state: GateState,
    pub warmup_error: Option<String>,
    pub feed_connected: bool,
    pub last_feed_error: Option<String>,
    pub dropped_events: u64,
    pub discarded_signals: u64,
}

impl BotStateView {
    /// The view of an idle bot.
    pub fn stopped(asset: impl Into<String>) -> Self {
        Self {
            bot_status: BotStatus::Stopped,
            asset: asset.into(),
            timestamp: now_rfc3339(),
            positions: Vec::new(),
            live_prices: BTreeMap::new(),
            ui_state: UiState {
                last_signal: Signal::None,
                atm_strike: None,
                pending_signal: None,
            },
            indicators: IndicatorView::default(),
            gate_state: GateState::Gated,
            warmup_error: None,
            feed_connected: false,
            last_feed_error: None,
            dropped_events: 0,
            discarded_signals: 0,
        }
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &PositionView> {
        self.positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Latest published view plus a change counter.
pub struct SnapshotCell {
    view: RwLock<Arc<BotStateView>>,
    version: AtomicU64,
    signal: Mutex<()>,
    changed: Condvar,
}

impl std::fmt::Debug for SnapshotCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCell")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl SnapshotCell {
    pub fn new(initial: BotStateView) -> Self {
        Self {
            view: RwLock::new(Arc::new(initial)),
            version: AtomicU64::new(0),
            signal: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    /// Current view. Side-effect free and safe from any thread.
    pub fn snapshot(&self) -> Arc<BotStateView> {
        Arc::clone(&self.view.read())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn publish(&self, view: BotStateView) {
        let next = Arc::new(view);
        *self.view.write() = next;
        let _guard = self.signal.lock();
        self.version.fetch_add(1, Ordering::AcqRel);
        self.changed.notify_all();
    }

    /// Wait until the version moves past `seen` or `timeout` elapses.
    /// Returns the version observed on wake-up.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        let mut guard = self.signal.lock();
        if self.version() == seen {
            self.changed.wait_for(&mut guard, timeout);
        }
        self.version()
    }

    fn wait_until(&self, seen: u64, timeout: Duration, stop: &AtomicBool) {
        let mut guard = self.signal.lock();
        if self.version() == seen && !stop.load(Ordering::Acquire) {
            self.changed.wait_for(&mut guard, timeout);
        }
    }

    fn wake(&self) {
        let _guard = self.signal.lock();
        self.changed.notify_all();
    }
}

/// Destination for broadcast snapshots (websocket, stdout, test buffer).
pub trait SnapshotSink: Send {
    fn send(&mut self, view: &BotStateView) -> std::io::Result<()>;
}

/// Collects every view it is sent. Useful for tests and replays.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    views: Arc<Mutex<Vec<BotStateView>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn views(&self) -> Vec<BotStateView> {
        self.views.lock().clone()
    }

    pub fn last(&self) -> Option<BotStateView> {
        self.views.lock().last().cloned()
    }
}

impl SnapshotSink for MemorySink {
    fn send(&mut self, view: &BotStateView) -> std::io::Result<()> {
        self.views.lock().push(view.clone());
        Ok(())
    }
}

/// Background broadcaster. Stops (after one final push) on [`stop`](Self::stop)
/// or when dropped.
pub struct SnapshotPublisher {
    cell: Arc<SnapshotCell>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl SnapshotPublisher {
    pub fn spawn(
        cell: Arc<SnapshotCell>,
        cadence: Duration,
        mut sink: Box<dyn SnapshotSink>,
    ) -> Result<Self, EngineError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_cell = Arc::clone(&cell);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("vortexlab-snapshot".into())
            .spawn(move || broadcast_loop(&thread_cell, cadence, sink.as_mut(), &thread_stop))
            .map_err(|source| EngineError::Spawn {
                name: "snapshot",
                source,
            })?;
        Ok(Self {
            cell,
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the loop and return how many views were sent.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        self.cell.wake();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(sent)) => sent,
            Some(Err(_)) => {
                warn!("snapshot thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for SnapshotPublisher {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn broadcast_loop(
    cell: &SnapshotCell,
    cadence: Duration,
    sink: &mut dyn SnapshotSink,
    stop: &AtomicBool,
) -> u64 {
    let mut sent = 0u64;
    loop {
        let stopping = stop.load(Ordering::Acquire);
        let version = cell.version();
        // Periodic pushes go out even when nothing changed.
        let view = cell.snapshot();
        match sink.send(&view) {
            Ok(()) => sent += 1,
            Err(e) => warn!(error = %e, "snapshot sink failed"),
        }
        if stopping {
            break;
        }
        cell.wait_until(version, cadence, stop);
    }
    debug!(sent, "snapshot publisher stopped");
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn view(asset: &str, status: BotStatus) -> BotStateView {
        let mut v = BotStateView::stopped(asset);
        v.bot_status = status;
        v
    }

    #[test]
    fn not_ready_indicators_serialize_as_null() {
        let reading = IndicatorReading::NotReady { bars: 3, required: 23 };
        let v = IndicatorView::from(&reading);
        let json = serde_json::to_value(&v).unwrap();
        assert!(json["ema"].is_null());
        assert!(json["vi_plus"].is_null());
        assert_eq!(json["ready"], false);
    }

    #[test]
    fn view_has_required_fields() {
        let json = serde_json::to_value(view("NIFTY", BotStatus::Starting)).unwrap();
        for key in [
            "bot_status",
            "asset",
            "timestamp",
            "positions",
            "live_prices",
            "ui_state",
            "indicators",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["bot_status"], "STARTING");
        assert_eq!(json["ui_state"]["last_signal"], "NONE");
        assert!(chrono::DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn cell_versions_and_readers() {
        let cell = SnapshotCell::new(view("A", BotStatus::Stopped));
        let before = cell.snapshot();
        assert_eq!(cell.version(), 0);
        cell.publish(view("A", BotStatus::Running));
        assert_eq!(cell.version(), 1);
        // An old reader keeps its view.
        assert_eq!(before.bot_status, BotStatus::Stopped);
        assert_eq!(cell.snapshot().bot_status, BotStatus::Running);
    }

    #[test]
    fn wait_for_change_times_out_without_publish() {
        let cell = SnapshotCell::new(view("A", BotStatus::Stopped));
        let started = Instant::now();
        assert_eq!(cell.wait_for_change(0, Duration::from_millis(10)), 0);
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn publisher_pushes_changes_and_final_view() {
        let cell = Arc::new(SnapshotCell::new(view("A", BotStatus::Starting)));
        let sink = MemorySink::new();
        let publisher =
            SnapshotPublisher::spawn(Arc::clone(&cell), Duration::from_secs(60), Box::new(sink.clone()))
                .unwrap();
        cell.publish(view("A", BotStatus::Running));
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.last().map(|v| v.bot_status) != Some(BotStatus::Running) {
            assert!(Instant::now() < deadline, "publisher never picked up the change");
            thread::sleep(Duration::from_millis(2));
        }
        cell.publish(view("A", BotStatus::Stopped));
        let sent = publisher.stop();
        assert!(sent >= 2);
        assert_eq!(sink.last().unwrap().bot_status, BotStatus::Stopped);
    }
}

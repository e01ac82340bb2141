//! Session lifecycle: start, run the consumer thread, stop.
//!
//! Threads:
//! - the feed's own context, which only calls `FeedPublisher::publish`
//! - `vortexlab-consumer`, which owns the [`Engine`]
//! - `vortexlab-snapshot`, which broadcasts views read from the cell

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tracing::{error, info, warn};

use super::consumer::Engine;
use super::state::BotStatus;
use crate::config::EngineConfig;
use crate::data::CandleSource;
use crate::domain::{Instrument, Position};
use crate::error::EngineError;
use crate::feed::{Consumed, FeedBridge, FeedStats, MarketFeed};
use crate::snapshot::{BotStateView, SnapshotCell, SnapshotPublisher, SnapshotSink};

/// How long the consumer waits on a quiet bridge before running the
/// staleness check.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Where warm-up candles come from.
#[derive(Clone, Copy)]
pub struct WarmupSources<'a> {
    pub historical: &'a dyn CandleSource,
    pub intraday: &'a dyn CandleSource,
}

/// What a stopped session leaves behind.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub view: Arc<BotStateView>,
    pub positions: Vec<Position>,
    pub feed: FeedStats,
    pub snapshots_sent: u64,
}

pub struct Session {
    bridge: FeedBridge,
    feed: Box<dyn MarketFeed>,
    cell: Arc<SnapshotCell>,
    stopping: Arc<AtomicBool>,
    consumer: Option<JoinHandle<Engine>>,
    publisher: Option<SnapshotPublisher>,
}

impl Session {
    /// Warm up, subscribe the feed and spawn the worker threads.
    ///
    /// `now` is the exchange-local start time; it bounds the warm-up fetch.
    pub fn start(
        config: EngineConfig,
        sources: WarmupSources<'_>,
        feed: Box<dyn MarketFeed>,
        sink: Box<dyn SnapshotSink>,
        now: NaiveDateTime,
    ) -> Result<Self, EngineError> {
        let feed_config = config.feed.clone();
        let cadence = config.snapshot.cadence();
        let instruments: Vec<Instrument> = config.all_instruments().into_iter().cloned().collect();

        let mut engine = Engine::new(config)?;
        let cell = Arc::new(SnapshotCell::new(engine.view()));
        info!(asset = %engine.state().asset, feed = feed.name(), "session starting");

        engine.warm_up(sources.historical, sources.intraday, now)?;
        cell.publish(engine.view());

        let bridge = FeedBridge::new(feed_config.capacity, feed_config.backpressure());
        let stopping = Arc::new(AtomicBool::new(false));
        let publisher = SnapshotPublisher::spawn(Arc::clone(&cell), cadence, sink)?;

        let consumer = {
            let bridge = bridge.clone();
            let cell = Arc::clone(&cell);
            let stopping = Arc::clone(&stopping);
            let grace = feed_config.drain_grace();
            thread::Builder::new()
                .name("vortexlab-consumer".into())
                .spawn(move || consume_loop(engine, &bridge, &cell, &stopping, grace))
                .map_err(|source| EngineError::Spawn {
                    name: "consumer",
                    source,
                })?
        };

        let mut session = Self {
            bridge,
            feed,
            cell,
            stopping,
            consumer: Some(consumer),
            publisher: Some(publisher),
        };

        let publisher = session.bridge.publisher();
        if let Err(e) = session.feed.subscribe(&instruments, publisher) {
            error!(error = %e, "feed subscription failed");
            session.stop();
            return Err(e);
        }
        Ok(session)
    }

    /// Latest published view. Never blocks the consumer.
    pub fn snapshot(&self) -> Arc<BotStateView> {
        self.cell.snapshot()
    }

    pub fn status(&self) -> BotStatus {
        self.cell.snapshot().bot_status
    }

    pub fn feed_stats(&self) -> FeedStats {
        self.bridge.stats()
    }

    /// STOPPING → drain (bounded by the grace period) → SHUTDOWN force-close
    /// → release the feed → STOPPED.
    pub fn stop(mut self) -> SessionSummary {
        self.shutdown()
    }

    fn shutdown(&mut self) -> SessionSummary {
        info!("session stopping");
        self.stopping.store(true, Ordering::Release);
        self.bridge.close();

        let engine = match self.consumer.take().map(JoinHandle::join) {
            Some(Ok(engine)) => Some(engine),
            Some(Err(_)) => {
                error!("consumer thread panicked");
                None
            }
            None => None,
        };

        self.feed.unsubscribe();

        let positions = match engine {
            Some(mut engine) => {
                engine.mark_stopped();
                engine.set_dropped_events(self.bridge.stats().dropped);
                self.cell.publish(engine.view());
                engine.position_manager().positions().cloned().collect()
            }
            None => Vec::new(),
        };

        let snapshots_sent = self.publisher.take().map_or(0, SnapshotPublisher::stop);
        let summary = SessionSummary {
            view: self.cell.snapshot(),
            positions,
            feed: self.bridge.stats(),
            snapshots_sent,
        };
        info!(
            positions = summary.positions.len(),
            delivered = summary.feed.delivered,
            dropped = summary.feed.dropped,
            "session stopped"
        );
        summary
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            self.shutdown();
        }
    }
}

fn consume_loop(
    mut engine: Engine,
    bridge: &FeedBridge,
    cell: &SnapshotCell,
    stopping: &AtomicBool,
    grace: Duration,
) -> Engine {
    // Only market data resets the idle timer; a flapping connection does not.
    let mut last_data = Instant::now();
    let mut deadline: Option<Instant> = None;

    loop {
        if deadline.is_none() && stopping.load(Ordering::Acquire) {
            engine.begin_stop();
            cell.publish(engine.view());
            deadline = Some(Instant::now() + grace);
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                let abandoned = bridge.abandon();
                if abandoned > 0 {
                    warn!(abandoned, "drain grace elapsed, abandoning queued events");
                }
                break;
            }
        }

        match bridge.consume_timeout(IDLE_POLL) {
            Consumed::Event(event) => {
                let is_data = event.is_data();
                if is_data {
                    last_data = Instant::now();
                }
                engine.handle(event);
                if !is_data && deadline.is_none() {
                    engine.on_idle(last_data.elapsed());
                }
                engine.set_dropped_events(bridge.stats().dropped);
                cell.publish(engine.view());
            }
            Consumed::Timeout => {
                if deadline.is_none() && engine.on_idle(last_data.elapsed()).is_some() {
                    cell.publish(engine.view());
                }
            }
            Consumed::Closed => break,
        }
    }

    let now = engine
        .feed_clock()
        .unwrap_or_else(|| chrono::Local::now().naive_local());
    engine.shutdown(now);
    cell.publish(engine.view());
    engine
}

/// Control-surface helper: at most one session at a time.
#[derive(Default)]
pub struct SessionController {
    session: Option<Session>,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        config: EngineConfig,
        sources: WarmupSources<'_>,
        feed: Box<dyn MarketFeed>,
        sink: Box<dyn SnapshotSink>,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        if self.session.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        self.session = Some(Session::start(config, sources, feed, sink, now)?);
        Ok(())
    }

    /// Stop the running session, if any.
    pub fn stop(&mut self) -> Option<SessionSummary> {
        self.session.take().map(Session::stop)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn snapshot(&self) -> Option<Arc<BotStateView>> {
        self.session.as_ref().map(Session::snapshot)
    }
}

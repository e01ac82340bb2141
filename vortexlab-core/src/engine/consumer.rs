//! The single consumer: every mutation of series, indicators, gate and
//! positions happens here, one feed event at a time.
//!
//! Per event:
//!   1. update the instrument's candle series (and live price)
//!   2. on a signal-series bar close: indicators → gate → position manager
//!   3. position manager tick step (stops, exits)
//!
//! Step 2 always sees the closed bar fully applied before anything reads it.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, warn};

use super::state::{BotState, BotStatus};
use crate::config::EngineConfig;
use crate::data::{CandleSeries, CandleSource, FetchRange, SeriesUpdate, WarmupMerger};
use crate::domain::{bar_start, ExitReason, LegBook, LiveTick, Position};
use crate::error::EngineError;
use crate::feed::FeedEvent;
use crate::indicators::{IndicatorEngine, IndicatorReading};
use crate::position_management::{BarClose, PositionManager};
use crate::snapshot::{now_rfc3339, BotStateView, IndicatorView, LivePriceView, PositionView, UiState};
use crate::strategy::{GateState, StrategyGate};

pub struct Engine {
    config: EngineConfig,
    state: BotState,
    series: HashMap<String, CandleSeries>,
    indicators: IndicatorEngine,
    reading: IndicatorReading,
    gate: StrategyGate,
    pm: PositionManager,
    live: BTreeMap<String, LiveTick>,
    /// Latest event timestamp seen from the feed.
    feed_clock: Option<NaiveDateTime>,
    dropped_events: u64,
}

impl Engine {
    /// Validate the config and resolve the traded legs. Either failure is
    /// fatal for the session.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let legs = LegBook::from_instruments(&config.instruments.legs)?;

        let session = &config.session;
        let indicators = IndicatorEngine::new(&config.indicators);
        let gate = StrategyGate::new(
            config.strategy.clone(),
            session.entry_window,
            session.min_warmup_bars,
        );
        let pm = PositionManager::new(
            config.risk.clone(),
            session.eod_cutoff,
            config.data_gap(),
            legs,
        );

        let mut series = HashMap::new();
        for inst in config.all_instruments() {
            series.insert(
                inst.symbol.clone(),
                CandleSeries::new(&inst.symbol, session.bar_interval_minutes),
            );
        }

        let asset = config.instruments.underlying.symbol.clone();
        info!(
            asset = %asset,
            legs = ?pm.legs().symbols(),
            required_bars = indicators.required_bars(),
            "engine created"
        );

        Ok(Self {
            reading: IndicatorReading::NotReady {
                bars: 0,
                required: indicators.required_bars(),
            },
            state: BotState::new(asset),
            config,
            series,
            indicators,
            gate,
            pm,
            live: BTreeMap::new(),
            feed_clock: None,
            dropped_events: 0,
        })
    }

    /// Build every series from history plus today's bars up to (not
    /// including) the bar that contains `now`.
    ///
    /// A short signal series is recorded as the warm-up error and the gate
    /// stays closed; source failures are returned.
    pub fn warm_up(
        &mut self,
        historical: &dyn CandleSource,
        intraday: &dyn CandleSource,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        let session = &self.config.session;
        let interval = session.bar_interval_minutes;
        let today = now.date().and_time(chrono::NaiveTime::MIN);
        let forming = bar_start(now, interval);
        // The historical endpoint may also return today's bars; the merge
        // lets intraday win wherever the two overlap.
        let history = FetchRange::new(today - Duration::days(session.history_days), forming);
        let intra = FetchRange::new(today, forming);
        let asset = self.state.asset.clone();

        let instruments: Vec<_> = self.config.all_instruments().into_iter().cloned().collect();
        for inst in &instruments {
            let hist = historical.fetch(inst, &history)?;
            let day = intraday.fetch(inst, &intra)?;
            let min_bars = if inst.symbol == asset { session.min_warmup_bars } else { 0 };
            let merged = WarmupMerger::new(&inst.symbol, interval, min_bars).merge(&hist, &day);
            let series = match merged {
                Ok(series) => series,
                Err(short) => {
                    let err = EngineError::from(&short);
                    warn!(error = %err, "warm-up incomplete, strategy stays gated");
                    self.state.warmup_error = Some(err.to_string());
                    short.series
                }
            };
            self.series.insert(inst.symbol.clone(), series);
        }
        self.after_warm_up();
        Ok(())
    }

    /// Install pre-built series directly (replays, tests).
    pub fn load_series(&mut self, series: CandleSeries) {
        self.series.insert(series.instrument().to_string(), series);
        self.after_warm_up();
    }

    fn after_warm_up(&mut self) {
        let Some(signal_series) = self.series.get(&self.state.asset) else {
            return;
        };
        self.reading = self.indicators.on_bar_close(signal_series);
        let bars = signal_series.len();
        if bars >= self.config.session.min_warmup_bars {
            self.state.warmup_error = None;
        }
        if self.gate.prime(bars, &self.reading) == GateState::Armed {
            self.state.set_status(BotStatus::Running);
        }

        let symbols: Vec<String> = self.pm.legs().symbols().into_iter().map(String::from).collect();
        for sym in symbols {
            let atr = self.series.get(&sym).and_then(|s| self.indicators.atr(s));
            self.pm.update_volatility(&sym, atr);
        }
    }

    /// Apply one feed event. Returns a position if this event closed one.
    pub fn handle(&mut self, event: FeedEvent) -> Option<Position> {
        match event {
            FeedEvent::Tick(tick) => self.on_tick(tick),
            FeedEvent::Bar { instrument, candle } => {
                // A finished bar is known at its close, not its open.
                let interval = Duration::minutes(i64::from(self.config.session.bar_interval_minutes));
                let tick = LiveTick::new(instrument, candle.close, candle.open_time + interval)
                    .with_volume(candle.volume);
                self.on_update(tick, SeriesUpdate::Bar(candle))
            }
            FeedEvent::Disconnected { reason } => {
                let err = EngineError::FeedDisconnect { reason };
                warn!(error = %err, "feed lost, holding last state until the gap threshold trips");
                self.state.feed_connected = false;
                self.state.last_feed_error = Some(err.to_string());
                None
            }
            FeedEvent::Reconnected => {
                info!("feed reconnected");
                self.state.feed_connected = true;
                None
            }
        }
    }

    pub fn on_tick(&mut self, tick: LiveTick) -> Option<Position> {
        let update = SeriesUpdate::from(&tick);
        self.on_update(tick, update)
    }

    fn on_update(&mut self, tick: LiveTick, update: SeriesUpdate) -> Option<Position> {
        if self.feed_clock.map_or(true, |c| tick.timestamp > c) {
            self.feed_clock = Some(tick.timestamp);
        }

        let symbol = tick.instrument.clone();
        let bar_closed = match self.series.get_mut(&symbol) {
            Some(series) => series.append_or_update(update),
            None => {
                debug!(instrument = %symbol, "update for an unsubscribed instrument");
                false
            }
        };

        if bar_closed {
            if self.pm.legs().symbols().contains(&symbol.as_str()) {
                let atr = self.series.get(&symbol).and_then(|s| self.indicators.atr(s));
                self.pm.update_volatility(&symbol, atr);
            }
            if symbol == self.state.asset {
                self.on_signal_bar_close(tick.timestamp);
            }
        }

        let closed = self.pm.on_tick(&tick);
        self.live.insert(symbol, tick);
        closed
    }

    fn on_signal_bar_close(&mut self, event_time: NaiveDateTime) {
        let Some(series) = self.series.get(&self.state.asset) else {
            return;
        };
        let (Some(bar), Some(bar_index)) = (series.last_closed().copied(), series.last_index()) else {
            return;
        };
        self.reading = self.indicators.on_bar_close(series);

        let ctx = self.pm.gate_context();
        let produced = self.gate.on_bar_close(bar_index + 1, &self.reading, &ctx);
        if bar_index + 1 >= self.config.session.min_warmup_bars {
            self.state.warmup_error = None;
        }
        if self.gate.state() != GateState::Gated && self.state.status() == BotStatus::Starting {
            self.state.set_status(BotStatus::Running);
        }

        let signal = match produced {
            Some(p) => {
                self.state.last_signal = p.signal;
                self.gate.consume()
            }
            None => None,
        };

        let closed = BarClose {
            bar_index,
            open_time: bar.open_time,
            event_time,
        };
        if let Err(err) = self.pm.on_bar_close(&closed, signal, &self.series) {
            debug!(bar_index, error = %err, "bar-close signal not taken");
        }
    }

    /// Staleness check while the feed is quiet. `idle_for` is the wall time
    /// since the last event; the feed clock is advanced by it.
    pub fn on_idle(&mut self, idle_for: std::time::Duration) -> Option<Position> {
        let clock = self.feed_clock?;
        let idle = Duration::from_std(idle_for).unwrap_or_else(|_| Duration::days(1));
        let now = clock.checked_add_signed(idle).unwrap_or(clock);
        self.pm.check_staleness(now)
    }

    /// Enter STOPPING. Further events are still applied while draining.
    pub fn begin_stop(&mut self) {
        self.state.set_status(BotStatus::Stopping);
    }

    /// Drop any pending entry and force-close the open position with
    /// SHUTDOWN. The bot stays STOPPING until [`mark_stopped`](Self::mark_stopped).
    pub fn shutdown(&mut self, now: NaiveDateTime) -> Option<Position> {
        self.state.set_status(BotStatus::Stopping);
        self.pm.force_close(ExitReason::Shutdown, now)
    }

    pub fn mark_stopped(&mut self) {
        self.state.set_status(BotStatus::Stopped);
    }

    pub fn set_dropped_events(&mut self, dropped: u64) {
        self.dropped_events = dropped;
    }

    pub fn status(&self) -> BotStatus {
        self.state.status()
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    pub fn gate(&self) -> &StrategyGate {
        &self.gate
    }

    pub fn position_manager(&self) -> &PositionManager {
        &self.pm
    }

    pub fn series(&self, symbol: &str) -> Option<&CandleSeries> {
        self.series.get(symbol)
    }

    pub fn reading(&self) -> &IndicatorReading {
        &self.reading
    }

    pub fn feed_clock(&self) -> Option<NaiveDateTime> {
        self.feed_clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assemble the observer view of the current state.
    pub fn view(&self) -> BotStateView {
        BotStateView {
            bot_status: self.state.status(),
            asset: self.state.asset.clone(),
            timestamp: now_rfc3339(),
            positions: self.pm.positions().map(PositionView::from).collect(),
            live_prices: self
                .live
                .iter()
                .map(|(sym, t)| (sym.clone(), LivePriceView::from(t)))
                .collect(),
            ui_state: UiState {
                last_signal: self.state.last_signal,
                atm_strike: self.pm.legs().atm_strike(),
                pending_signal: self.gate.pending().copied(),
            },
            indicators: IndicatorView::from(&self.reading),
            gate_state: self.gate.state(),
            warmup_error: self.state.warmup_error.clone(),
            feed_connected: self.state.feed_connected,
            last_feed_error: self.state.last_feed_error.clone(),
            dropped_events: self.dropped_events,
            discarded_signals: self.pm.discarded_signals(),
        }
    }
}

//! Simulated position lifecycle.
//!
//! Entry is deferred: a signal stamped with bar T fills at the open of the
//! first bar that closes after T (bar T+1), never with bar T's prices.
//!
//! Per tick, exits are checked in priority order:
//! DATA_GAP → STOP → SIGNAL → EOD. The tick that filled an entry is exempt.
//!
//! Stop math goes through [`LegCapability`] only, so option and future legs
//! share one code path.

use chrono::{NaiveDateTime, NaiveTime};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::ratchet::{RatchetState, Side};
use crate::config::RiskConfig;
use crate::data::CandleSeries;
use crate::domain::{
    ExitReason, LegBook, LegCapability, LiveTick, Position, PositionId, PositionStatus, Signal,
    TradeLeg,
};
use crate::error::EngineError;
use crate::strategy::{GateContext, PendingSignal};

/// An accepted entry signal waiting for the next bar.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub signal: Signal,
    pub signal_bar: usize,
    pub leg: TradeLeg,
}

/// The bar that just closed on the signal series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarClose {
    pub bar_index: usize,
    pub open_time: NaiveDateTime,
    /// Timestamp of the update that closed the bar.
    pub event_time: NaiveDateTime,
}

#[derive(Debug, Clone)]
struct OpenPosition {
    position: Position,
    ratchet: RatchetState,
    /// Set on fill; the next tick skips exit checks.
    fresh: bool,
}

#[derive(Debug, Clone)]
pub struct PositionManager {
    risk: RiskConfig,
    eod_cutoff: NaiveTime,
    data_gap: chrono::Duration,
    legs: LegBook,
    pending: Option<PendingEntry>,
    open: Option<OpenPosition>,
    closed: Vec<Position>,
    exit_requested: bool,
    volatility: HashMap<String, f64>,
    last_seen: HashMap<String, NaiveDateTime>,
    last_price: HashMap<String, f64>,
    next_id: u64,
    discarded_signals: u64,
}

impl PositionManager {
    pub fn new(
        risk: RiskConfig,
        eod_cutoff: NaiveTime,
        data_gap: chrono::Duration,
        legs: LegBook,
    ) -> Self {
        Self {
            risk,
            eod_cutoff,
            data_gap,
            legs,
            pending: None,
            open: None,
            closed: Vec::new(),
            exit_requested: false,
            volatility: HashMap::new(),
            last_seen: HashMap::new(),
            last_price: HashMap::new(),
            next_id: 1,
            discarded_signals: 0,
        }
    }

    pub fn legs(&self) -> &LegBook {
        &self.legs
    }

    pub fn open_position(&self) -> Option<&Position> {
        self.open.as_ref().map(|o| &o.position)
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    /// Closed positions in close order, then the open one.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.closed.iter().chain(self.open_position())
    }

    pub fn pending(&self) -> Option<&PendingEntry> {
        self.pending.as_ref()
    }

    pub fn has_position(&self) -> bool {
        self.open.is_some()
    }

    pub fn discarded_signals(&self) -> u64 {
        self.discarded_signals
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.last_price.get(symbol).copied()
    }

    pub fn gate_context(&self) -> GateContext {
        match self.open_position() {
            Some(p) => GateContext {
                open_exposure: Some(p.leg.exposure()),
                profit_locked: p.trailing_armed,
            },
            None => GateContext::default(),
        }
    }

    /// Latest volatility (ATR) of a traded leg, refreshed on bar close.
    pub fn update_volatility(&mut self, symbol: &str, atr: Option<f64>) {
        match atr {
            Some(v) if v.is_finite() && v > 0.0 => {
                self.volatility.insert(symbol.to_string(), v);
            }
            _ => {
                self.volatility.remove(symbol);
            }
        }
    }

    /// Bar-close step: fill a pending entry from an earlier bar, then take the
    /// signal produced on this bar.
    ///
    /// A rejected entry signal is reported as `InvalidSignalState`; the
    /// manager's state is still fully updated.
    pub fn on_bar_close(
        &mut self,
        closed: &BarClose,
        signal: Option<PendingSignal>,
        series: &HashMap<String, CandleSeries>,
    ) -> Result<(), EngineError> {
        self.fill_pending(closed, series);

        let Some(pending) = signal else {
            return Ok(());
        };

        match pending.signal {
            Signal::None => Ok(()),
            Signal::Exit => {
                if self.open.is_some() {
                    info!(bar_index = pending.bar_index, "exit requested");
                    self.exit_requested = true;
                } else {
                    debug!(bar_index = pending.bar_index, "exit signal with no open position");
                }
                Ok(())
            }
            entry => self.accept_entry(entry, pending.bar_index),
        }
    }

    fn accept_entry(&mut self, signal: Signal, bar_index: usize) -> Result<(), EngineError> {
        let Some(exposure) = signal.exposure() else {
            return Ok(());
        };
        let leg = self.legs.leg_for(exposure).clone();

        if self.open.is_some() || self.pending.is_some() {
            self.discarded_signals += 1;
            let err = EngineError::InvalidSignalState {
                signal,
                instrument: leg.symbol().to_string(),
            };
            warn!(bar_index, error = %err, "signal discarded");
            return Err(err);
        }

        debug!(signal = %signal, bar_index, leg = leg.symbol(), "entry pending for next bar");
        self.pending = Some(PendingEntry {
            signal,
            signal_bar: bar_index,
            leg,
        });
        Ok(())
    }

    fn fill_pending(&mut self, closed: &BarClose, series: &HashMap<String, CandleSeries>) {
        let due = matches!(&self.pending, Some(p) if p.signal_bar < closed.bar_index);
        if !due {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };

        if closed.open_time.time() >= self.eod_cutoff {
            info!(signal = %pending.signal, "pending entry dropped at end of session");
            return;
        }

        let symbol = pending.leg.symbol().to_string();
        let entry_bar = series
            .get(&symbol)
            .and_then(|s| s.bar_at(closed.open_time))
            .copied();
        let Some(bar) = entry_bar else {
            warn!(
                leg = %symbol,
                bar_open = %closed.open_time,
                "no leg bar for the entry bar, dropping pending entry"
            );
            return;
        };

        let leg = pending.leg;
        let sign = leg.direction_sign();
        let entry = bar.open;
        let distance = self.risk.initial_stop.distance(self.volatility.get(&symbol).copied());
        let stop = leg.round_stop(entry - sign * distance);
        let target = leg.round_target(entry + sign * self.risk.take_profit_points);
        let quantity = f64::from(self.risk.lots) * leg.instrument.lot_size;
        let last_price = self.last_price.get(&symbol).copied().unwrap_or(entry);

        let id = PositionId(self.next_id);
        self.next_id += 1;
        let position = Position {
            id,
            leg,
            quantity,
            signal_bar: pending.signal_bar,
            entry_bar: closed.bar_index,
            entry_time: bar.open_time,
            entry_price: entry,
            initial_stop: stop,
            stop_price: stop,
            take_profit_price: target,
            trailing_armed: false,
            best_price: entry,
            last_price,
            status: PositionStatus::Open,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
        };
        info!(
            id = %id,
            leg = %symbol,
            signal_bar = pending.signal_bar,
            entry_bar = closed.bar_index,
            entry,
            stop,
            target,
            quantity,
            risk = position.initial_risk(),
            "position opened"
        );

        let seen = self.last_seen.entry(symbol).or_insert(closed.event_time);
        if *seen < closed.event_time {
            *seen = closed.event_time;
        }
        self.exit_requested = false;
        self.open = Some(OpenPosition {
            ratchet: RatchetState::new(Side::from_sign(sign), stop),
            position,
            fresh: true,
        });
    }

    /// Tick step. Returns the position if this tick closed it.
    pub fn on_tick(&mut self, tick: &LiveTick) -> Option<Position> {
        let now = tick.timestamp;
        let prev_seen = self.last_seen.insert(tick.instrument.clone(), now);
        self.last_price.insert(tick.instrument.clone(), tick.ltp);

        let leg_symbol = self.open.as_ref()?.position.symbol().to_string();
        let on_leg = tick.instrument == leg_symbol;

        if self.open.as_ref().is_some_and(|o| o.fresh) {
            if let Some(open) = self.open.as_mut() {
                open.fresh = false;
                if on_leg {
                    Self::mark(open, tick.ltp, &self.risk, None);
                }
            }
            return None;
        }

        // (0) data gap on the leg
        let leg_seen = if on_leg {
            prev_seen
        } else {
            self.last_seen.get(&leg_symbol).copied()
        };
        if let Some(seen) = leg_seen {
            if now - seen > self.data_gap {
                let err = EngineError::DataGap {
                    instrument: leg_symbol.clone(),
                    stale_for_secs: (now - seen).num_seconds(),
                    threshold_secs: self.data_gap.num_seconds(),
                };
                warn!(error = %err, "forcing position closed");
                let price = self.leg_price(&leg_symbol);
                return self.close_open(price, now, ExitReason::DataGap);
            }
        }

        // (a) stop, after profit lock / trailing moved it
        if on_leg {
            let vol = self.volatility.get(&leg_symbol).copied();
            if let Some(open) = self.open.as_mut() {
                Self::mark(open, tick.ltp, &self.risk, vol);
                if open.position.stop_hit(tick.ltp) {
                    let stop = open.position.stop_price;
                    return self.close_open(stop, now, ExitReason::Stop);
                }
            }
        }

        // (b) exit signal
        if self.exit_requested {
            let price = self.leg_price(&leg_symbol);
            return self.close_open(price, now, ExitReason::Signal);
        }

        // (c) end of session
        if now.time() >= self.eod_cutoff {
            let price = self.leg_price(&leg_symbol);
            return self.close_open(price, now, ExitReason::Eod);
        }

        None
    }

    /// Update marks, the profit lock and the trailing stop for a leg price.
    fn mark(open: &mut OpenPosition, price: f64, risk: &RiskConfig, vol: Option<f64>) {
        let p = &mut open.position;
        let sign = p.direction_sign();
        p.last_price = price;
        if p.favorable_excess(price, p.best_price) > 0.0 {
            p.best_price = price;
        }

        if !p.trailing_armed && p.favorable_excess(price, p.take_profit_price) >= 0.0 {
            p.trailing_armed = true;
            let lock = p.leg.round_stop(p.entry_price + sign * risk.lock_buffer_points);
            p.stop_price = open.ratchet.apply(lock);
            info!(id = %p.id, stop = p.stop_price, "profit lock armed");
        }

        if p.trailing_armed && p.favorable_excess(p.best_price, p.take_profit_price) > 0.0 {
            if let Some(v) = vol {
                if risk.trail_atr_multiplier > 0.0 {
                    let proposed = p
                        .leg
                        .round_stop(p.best_price - sign * risk.trail_atr_multiplier * v);
                    let level = open.ratchet.apply(proposed);
                    if level != p.stop_price {
                        debug!(id = %p.id, from = p.stop_price, to = level, "trailing stop");
                        p.stop_price = level;
                    }
                }
            }
        }
    }

    /// Idle-time staleness check at feed-clock instant `now`.
    pub fn check_staleness(&mut self, now: NaiveDateTime) -> Option<Position> {
        let symbol = self.open.as_ref()?.position.symbol().to_string();
        let seen = self.last_seen.get(&symbol).copied()?;
        if now - seen <= self.data_gap {
            return None;
        }
        let err = EngineError::DataGap {
            instrument: symbol.clone(),
            stale_for_secs: (now - seen).num_seconds(),
            threshold_secs: self.data_gap.num_seconds(),
        };
        warn!(error = %err, "forcing position closed while feed is idle");
        let price = self.leg_price(&symbol);
        self.close_open(price, now, ExitReason::DataGap)
    }

    /// Close everything immediately (shutdown, operator action).
    pub fn force_close(&mut self, reason: ExitReason, now: NaiveDateTime) -> Option<Position> {
        if let Some(p) = self.pending.take() {
            info!(signal = %p.signal, "pending entry dropped on force close");
        }
        let symbol = self.open.as_ref()?.position.symbol().to_string();
        let price = self.leg_price(&symbol);
        self.close_open(price, now, reason)
    }

    fn leg_price(&self, symbol: &str) -> f64 {
        self.last_price
            .get(symbol)
            .copied()
            .or_else(|| self.open.as_ref().map(|o| o.position.last_price))
            .unwrap_or(f64::NAN)
    }

    fn close_open(&mut self, price: f64, now: NaiveDateTime, reason: ExitReason) -> Option<Position> {
        let mut open = self.open.take()?;
        open.position.close(price, now, reason);
        self.exit_requested = false;
        info!(
            id = %open.position.id,
            leg = open.position.symbol(),
            ?reason,
            exit = price,
            pnl = open.position.pnl(),
            "position closed"
        );
        self.closed.push(open.position.clone());
        Some(open.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitialStop;
    use crate::domain::{Candle, Instrument};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn risk() -> RiskConfig {
        RiskConfig {
            initial_stop: InitialStop::Fixed { points: 8.0 },
            take_profit_points: 10.0,
            lock_buffer_points: 5.0,
            trail_atr_multiplier: 0.5,
            lots: 1,
        }
    }

    fn future_pm() -> PositionManager {
        let legs = LegBook::from_instruments(&[Instrument::future("CRUDEOIL", 1.0, 100.0)]).unwrap();
        PositionManager::new(risk(), NaiveTime::from_hms_opt(15, 25, 0).unwrap(), chrono::Duration::minutes(5), legs)
    }

    /// Series with closed bars at 10:00 (index 0) and 10:05 (index 1, open 100).
    fn series() -> HashMap<String, CandleSeries> {
        let candles = vec![
            Candle::new(at(10, 0, 0), 95.0, 99.0, 94.0, 98.0, 0.0),
            Candle::new(at(10, 5, 0), 100.0, 101.0, 97.0, 99.0, 0.0),
        ];
        let mut map = HashMap::new();
        map.insert("CRUDEOIL".to_string(), CandleSeries::from_candles("CRUDEOIL", 5, candles));
        map
    }

    fn signal(sig: Signal, bar_index: usize) -> Option<PendingSignal> {
        Some(PendingSignal {
            signal: sig,
            bar_index,
            bar_open_time: at(10, 0, 0),
        })
    }

    fn open_long(pm: &mut PositionManager) {
        let s = series();
        pm.on_bar_close(
            &BarClose { bar_index: 0, open_time: at(10, 0, 0), event_time: at(10, 5, 0) },
            signal(Signal::EnterLongDerivativeCallLeg, 0),
            &s,
        )
        .unwrap();
        pm.on_bar_close(
            &BarClose { bar_index: 1, open_time: at(10, 5, 0), event_time: at(10, 10, 0) },
            None,
            &s,
        )
        .unwrap();
        // boundary tick: exempt from exits
        pm.on_tick(&LiveTick::new("CRUDEOIL", 99.0, at(10, 10, 0)));
    }

    #[test]
    fn entry_fills_at_next_bar_open() {
        let mut pm = future_pm();
        open_long(&mut pm);
        let p = pm.open_position().unwrap();
        assert_eq!(p.entry_price, 100.0);
        assert_eq!(p.signal_bar, 0);
        assert_eq!(p.entry_bar, 1);
        assert_eq!(p.stop_price, 92.0);
        assert_eq!(p.take_profit_price, 110.0);
        assert_eq!(p.quantity, 100.0);
    }

    #[test]
    fn signal_on_same_bar_does_not_fill() {
        let mut pm = future_pm();
        let s = series();
        pm.on_bar_close(
            &BarClose { bar_index: 1, open_time: at(10, 5, 0), event_time: at(10, 10, 0) },
            signal(Signal::EnterLongDerivativeCallLeg, 1),
            &s,
        )
        .unwrap();
        assert!(pm.open_position().is_none());
        assert!(pm.pending().is_some());
    }

    #[test]
    fn profit_lock_then_reversal_exits_at_buffer() {
        let mut pm = future_pm();
        open_long(&mut pm);
        assert!(pm.on_tick(&LiveTick::new("CRUDEOIL", 104.0, at(10, 11, 0))).is_none());
        assert!(pm.on_tick(&LiveTick::new("CRUDEOIL", 110.0, at(10, 12, 0))).is_none());
        assert_eq!(pm.open_position().unwrap().stop_price, 105.0);
        assert!(pm.on_tick(&LiveTick::new("CRUDEOIL", 107.0, at(10, 13, 0))).is_none());
        let closed = pm.on_tick(&LiveTick::new("CRUDEOIL", 104.5, at(10, 14, 0))).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Stop));
        assert_eq!(closed.exit_price, Some(105.0));
        assert_eq!(closed.pnl(), 500.0);
    }

    #[test]
    fn trailing_follows_best_price_with_volatility() {
        let mut pm = future_pm();
        pm.update_volatility("CRUDEOIL", Some(4.0));
        open_long(&mut pm);
        // ATR 4 does not change the fixed stop
        assert_eq!(pm.open_position().unwrap().stop_price, 92.0);
        pm.on_tick(&LiveTick::new("CRUDEOIL", 110.0, at(10, 11, 0)));
        assert_eq!(pm.open_position().unwrap().stop_price, 105.0);
        pm.on_tick(&LiveTick::new("CRUDEOIL", 120.0, at(10, 12, 0)));
        assert_eq!(pm.open_position().unwrap().stop_price, 118.0);
        pm.on_tick(&LiveTick::new("CRUDEOIL", 119.0, at(10, 13, 0)));
        assert_eq!(pm.open_position().unwrap().stop_price, 118.0);
    }

    #[test]
    fn stop_hit_before_target() {
        let mut pm = future_pm();
        open_long(&mut pm);
        let closed = pm.on_tick(&LiveTick::new("CRUDEOIL", 91.0, at(10, 11, 0))).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Stop));
        assert_eq!(closed.exit_price, Some(92.0));
    }

    #[test]
    fn data_gap_preempts_stop() {
        let mut pm = future_pm();
        open_long(&mut pm);
        let closed = pm.on_tick(&LiveTick::new("CRUDEOIL", 80.0, at(10, 16, 0))).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::DataGap));
        assert_eq!(closed.exit_price, Some(80.0));
    }

    #[test]
    fn idle_staleness_closes_at_last_price() {
        let mut pm = future_pm();
        open_long(&mut pm);
        pm.on_tick(&LiveTick::new("CRUDEOIL", 101.0, at(10, 11, 0)));
        assert!(pm.check_staleness(at(10, 16, 0)).is_none());
        let closed = pm.check_staleness(at(10, 16, 1)).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::DataGap));
        assert_eq!(closed.exit_price, Some(101.0));
    }

    #[test]
    fn exit_signal_closes_on_next_tick() {
        let mut pm = future_pm();
        open_long(&mut pm);
        let s = series();
        pm.on_bar_close(
            &BarClose { bar_index: 2, open_time: at(10, 10, 0), event_time: at(10, 15, 0) },
            signal(Signal::Exit, 2),
            &s,
        )
        .unwrap();
        let closed = pm.on_tick(&LiveTick::new("CRUDEOIL", 102.0, at(10, 15, 0))).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Signal));
        assert_eq!(closed.exit_price, Some(102.0));
    }

    #[test]
    fn eod_cutoff_closes() {
        let mut pm = future_pm();
        open_long(&mut pm);
        let mut t = at(10, 10, 0);
        while t < at(15, 20, 0) {
            t += chrono::Duration::minutes(4);
            assert!(pm.on_tick(&LiveTick::new("CRUDEOIL", 101.0, t)).is_none());
        }
        let closed = pm
            .on_tick(&LiveTick::new("CRUDEOIL", 101.0, at(15, 25, 0)))
            .unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Eod));
        assert_eq!(closed.exit_price, Some(101.0));
    }

    #[test]
    fn second_entry_signal_is_discarded() {
        let mut pm = future_pm();
        let s = series();
        pm.on_bar_close(
            &BarClose { bar_index: 0, open_time: at(10, 0, 0), event_time: at(10, 5, 0) },
            signal(Signal::EnterLongDerivativeCallLeg, 0),
            &s,
        )
        .unwrap();
        let err = pm
            .on_bar_close(
                &BarClose { bar_index: 1, open_time: at(10, 5, 0), event_time: at(10, 10, 0) },
                signal(Signal::EnterLongDerivativePutLeg, 1),
                &s,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSignalState { .. }));
        assert!(pm.open_position().is_some());
        assert!(pm.pending().is_none());
        assert_eq!(pm.discarded_signals(), 1);
    }

    #[test]
    fn short_future_mirrors_stop_math() {
        let mut pm = future_pm();
        let s = series();
        pm.on_bar_close(
            &BarClose { bar_index: 0, open_time: at(10, 0, 0), event_time: at(10, 5, 0) },
            signal(Signal::EnterLongDerivativePutLeg, 0),
            &s,
        )
        .unwrap();
        pm.on_bar_close(
            &BarClose { bar_index: 1, open_time: at(10, 5, 0), event_time: at(10, 10, 0) },
            None,
            &s,
        )
        .unwrap();
        pm.on_tick(&LiveTick::new("CRUDEOIL", 99.0, at(10, 10, 0)));
        let p = pm.open_position().unwrap();
        assert_eq!(p.direction_sign(), -1.0);
        assert_eq!(p.stop_price, 108.0);
        assert_eq!(p.take_profit_price, 90.0);
        pm.on_tick(&LiveTick::new("CRUDEOIL", 90.0, at(10, 11, 0)));
        assert_eq!(pm.open_position().unwrap().stop_price, 95.0);
        let closed = pm.on_tick(&LiveTick::new("CRUDEOIL", 96.0, at(10, 12, 0))).unwrap();
        assert_eq!(closed.exit_price, Some(95.0));
        assert_eq!(closed.pnl(), 500.0);
    }

    #[test]
    fn force_close_uses_last_price_and_drops_pending() {
        let mut pm = future_pm();
        open_long(&mut pm);
        pm.on_tick(&LiveTick::new("CRUDEOIL", 103.0, at(10, 11, 0)));
        let closed = pm.force_close(ExitReason::Shutdown, at(10, 12, 0)).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Shutdown));
        assert_eq!(closed.exit_price, Some(103.0));
        assert!(pm.force_close(ExitReason::Shutdown, at(10, 13, 0)).is_none());
    }

    #[test]
    fn missing_leg_bar_drops_entry() {
        let mut pm = future_pm();
        let s = series();
        pm.on_bar_close(
            &BarClose { bar_index: 1, open_time: at(10, 5, 0), event_time: at(10, 10, 0) },
            signal(Signal::EnterLongDerivativeCallLeg, 1),
            &s,
        )
        .unwrap();
        pm.on_bar_close(
            &BarClose { bar_index: 2, open_time: at(10, 10, 0), event_time: at(10, 15, 0) },
            None,
            &s,
        )
        .unwrap();
        assert!(pm.open_position().is_none());
        assert!(pm.pending().is_none());
    }
}

//! Strategy gate state machine.
//!
//! GATED → ARMED once the candle gate is open and indicators are ready.
//! ARMED → SIGNALED when a closed bar satisfies the entry (or exit) rule.
//! SIGNALED → ARMED when the signal is consumed, or at the next bar close if it
//! was not (the stale signal is dropped, never queued).
//!
//! Entry rule (bullish; bearish mirrors it):
//!   VI+ > VI-, (VI+ - VI-) wider than on the previous bar,
//!   close > EMA, CHOP < threshold, bar inside the entry window.
//!
//! Exit rule for an open bullish position (bearish mirrors it), once the
//! profit lock armed: close < EMA, or MACD histogram < 0.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::candle_gate::CandleGate;
use crate::config::{EntryWindow, StrategyConfig};
use crate::domain::{Exposure, Signal};
use crate::indicators::{IndicatorReading, IndicatorSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Gated,
    Armed,
    Signaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTransition {
    pub from: GateState,
    pub to: GateState,
    pub bar_index: usize,
}

/// A signal stamped with the bar that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PendingSignal {
    pub signal: Signal,
    pub bar_index: usize,
    pub bar_open_time: NaiveDateTime,
}

/// What the gate needs to know about the book.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GateContext {
    /// Exposure of the open position, if any.
    pub open_exposure: Option<Exposure>,
    /// Whether the open position's profit lock has armed.
    pub profit_locked: bool,
}

/// Entry decision for one snapshot. Returns `Signal::None` when nothing fires.
pub fn evaluate_entry(
    snap: &IndicatorSnapshot,
    choppiness_threshold: f64,
    window: Option<&EntryWindow>,
) -> Signal {
    if let Some(w) = window {
        if !w.contains(snap.open_time.time()) {
            return Signal::None;
        }
    }
    if snap.choppiness >= choppiness_threshold {
        return Signal::None;
    }
    let gap = snap.vortex_gap();
    let prev_gap = snap.prev_vortex_gap();
    if gap > 0.0 && gap > prev_gap && snap.close > snap.ema {
        Signal::EnterLongDerivativeCallLeg
    } else if gap < 0.0 && -gap > -prev_gap && snap.close < snap.ema {
        Signal::EnterLongDerivativePutLeg
    } else {
        Signal::None
    }
}

#[derive(Debug, Clone)]
pub struct StrategyGate {
    config: StrategyConfig,
    entry_window: Option<EntryWindow>,
    candle_gate: CandleGate,
    state: GateState,
    pending: Option<PendingSignal>,
    history: Vec<GateTransition>,
    expired: u64,
}

impl StrategyGate {
    pub fn new(config: StrategyConfig, entry_window: Option<EntryWindow>, min_bars: usize) -> Self {
        Self {
            config,
            entry_window,
            candle_gate: CandleGate::new(min_bars),
            state: GateState::Gated,
            pending: None,
            history: Vec::new(),
            expired: 0,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn history(&self) -> &[GateTransition] {
        &self.history
    }

    pub fn pending(&self) -> Option<&PendingSignal> {
        self.pending.as_ref()
    }

    /// Signals dropped because nobody consumed them before the next bar.
    pub fn expired_signals(&self) -> u64 {
        self.expired
    }

    pub fn bars_until_armed(&self) -> usize {
        self.candle_gate.bars_until_open()
    }

    /// Open the gate from warm-up history without producing a signal.
    pub fn prime(&mut self, bar_count: usize, reading: &IndicatorReading) -> GateState {
        self.candle_gate.observe(bar_count);
        if self.state == GateState::Gated && self.candle_gate.is_open() && reading.is_ready() {
            self.transition(GateState::Armed, bar_count.saturating_sub(1));
        }
        self.state
    }

    /// Evaluate a newly closed bar. `bar_count` is the closed-bar count of the
    /// signal series including this bar.
    ///
    /// Returns the signal produced on this bar, if any. The gate stays SIGNALED
    /// until [`StrategyGate::consume`] is called.
    pub fn on_bar_close(
        &mut self,
        bar_count: usize,
        reading: &IndicatorReading,
        ctx: &GateContext,
    ) -> Option<PendingSignal> {
        let bar_index = bar_count.saturating_sub(1);

        if self.state == GateState::Signaled {
            if let Some(stale) = self.pending.take() {
                self.expired += 1;
                debug!(
                    signal = %stale.signal,
                    produced_at = stale.bar_index,
                    bar_index,
                    "discarding unconsumed signal"
                );
            }
            self.transition(GateState::Armed, bar_index);
        }

        self.candle_gate.observe(bar_count);

        if self.state == GateState::Gated {
            if !(self.candle_gate.is_open() && reading.is_ready()) {
                return None;
            }
            self.transition(GateState::Armed, bar_index);
        }

        let snap = reading.snapshot()?;
        let signal = self.decide(snap, ctx);
        if signal == Signal::None {
            return None;
        }

        let pending = PendingSignal {
            signal,
            bar_index: snap.bar_index,
            bar_open_time: snap.open_time,
        };
        info!(
            signal = %signal,
            bar_index = snap.bar_index,
            ema = snap.ema,
            vi_plus = snap.vortex_plus,
            vi_minus = snap.vortex_minus,
            chop = snap.choppiness,
            "signal"
        );
        self.pending = Some(pending);
        self.transition(GateState::Signaled, bar_index);
        Some(pending)
    }

    /// Hand the current signal to the position manager. SIGNALED → ARMED.
    pub fn consume(&mut self) -> Option<PendingSignal> {
        let pending = self.pending.take()?;
        self.transition(GateState::Armed, pending.bar_index);
        Some(pending)
    }

    fn decide(&self, snap: &IndicatorSnapshot, ctx: &GateContext) -> Signal {
        let Some(exposure) = ctx.open_exposure else {
            return evaluate_entry(
                snap,
                self.config.choppiness_threshold,
                self.entry_window.as_ref(),
            );
        };
        if self.config.exit_requires_profit_lock && !ctx.profit_locked {
            return Signal::None;
        }
        // +1 while the open position wants price up, -1 while it wants it down.
        let side = match exposure {
            Exposure::Increase => 1.0,
            Exposure::Decrease => -1.0,
        };
        let ema_reversed = self.config.exit_on_ema_reversal && (snap.close - snap.ema) * side < 0.0;
        let macd_turned = self.config.exit_on_macd_histogram && snap.macd_histogram * side < 0.0;
        if ema_reversed || macd_turned {
            Signal::Exit
        } else {
            Signal::None
        }
    }

    fn transition(&mut self, to: GateState, bar_index: usize) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.history.push(GateTransition { from, to, bar_index });
        if from == GateState::Gated {
            info!(bar_index, "strategy gate armed");
        } else {
            debug!(?from, ?to, bar_index, "gate transition");
        }
    }
}

//! Simulated position state.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::ids::PositionId;
use super::leg::{LegCapability, TradeLeg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was closed. Exactly one per position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Stop,
    Signal,
    Eod,
    DataGap,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub leg: TradeLeg,
    pub quantity: f64,
    /// Bar index (in the signal series) that produced the entry signal.
    pub signal_bar: usize,
    /// Bar index (in the signal series) whose open filled the entry.
    pub entry_bar: usize,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub stop_price: f64,
    pub take_profit_price: f64,
    pub trailing_armed: bool,
    /// Most favorable leg price seen since entry.
    pub best_price: f64,
    pub last_price: f64,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_time: Option<NaiveDateTime>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn direction_sign(&self) -> f64 {
        self.leg.direction_sign()
    }

    pub fn symbol(&self) -> &str {
        self.leg.symbol()
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// (price - entry) * quantity * direction sign
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.direction_sign()
    }

    /// Realized PnL when closed, mark-to-last otherwise.
    pub fn pnl(&self) -> f64 {
        match self.exit_price {
            Some(exit) => self.pnl_at(exit),
            None => self.pnl_at(self.last_price),
        }
    }

    /// Amount lost if the initial stop is hit: ticks at risk times tick
    /// value times lots.
    pub fn initial_risk(&self) -> f64 {
        let tick = self.leg.tick_size();
        let lots = self.quantity / self.leg.instrument.lot_size;
        let ticks = (self.favorable_excess(self.entry_price, self.initial_stop) / tick).round();
        ticks * self.leg.tick_value() * lots
    }

    /// Signed distance by which `price` is beyond `level` in the position's favor.
    pub fn favorable_excess(&self, price: f64, level: f64) -> f64 {
        (price - level) * self.direction_sign()
    }

    pub fn stop_hit(&self, price: f64) -> bool {
        self.favorable_excess(price, self.stop_price) <= 0.0
    }

    /// Close exactly once. Returns false if the position was already closed.
    pub fn close(&mut self, price: f64, time: NaiveDateTime, reason: ExitReason) -> bool {
        if self.status == PositionStatus::Closed {
            return false;
        }
        self.status = PositionStatus::Closed;
        self.exit_price = Some(price);
        self.exit_time = Some(time);
        self.exit_reason = Some(reason);
        self.last_price = price;
        true
    }
}

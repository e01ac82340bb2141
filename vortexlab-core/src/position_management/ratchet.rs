//! Stop ratchet: a position's protective stop may tighten, never loosen,
//! even when volatility expands after entry.
//!
//! "Tighter" follows the leg's direction sign: long option premium (CALL or
//! PUT) and long futures ratchet upward, short futures downward.

/// Side of the leg price the position profits from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn from_sign(direction_sign: f64) -> Self {
        if direction_sign < 0.0 {
            Side::Short
        } else {
            Side::Long
        }
    }

    /// True when `candidate` sits closer to price than `current`.
    pub fn is_tighter(self, candidate: f64, current: f64) -> bool {
        match self {
            Side::Long => candidate > current,
            Side::Short => candidate < current,
        }
    }
}

/// The live stop of one position.
///
/// ```
/// use vortexlab_core::position_management::{RatchetState, Side};
///
/// let mut stop = RatchetState::new(Side::Long, 92.0);
/// assert_eq!(stop.apply(105.0), 105.0); // profit lock
/// assert_eq!(stop.apply(98.0), 105.0);  // wider trail ignored
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RatchetState {
    side: Side,
    level: f64,
    moves: u32,
}

impl RatchetState {
    pub fn new(side: Side, initial_stop: f64) -> Self {
        Self {
            side,
            level: initial_stop,
            moves: 0,
        }
    }

    /// Offer a new stop level; returns the stop in force afterwards.
    pub fn apply(&mut self, proposed: f64) -> f64 {
        if proposed.is_finite() && self.side.is_tighter(proposed, self.level) {
            self.level = proposed;
            self.moves += 1;
        }
        self.level
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    /// How many times the stop has tightened since entry.
    pub fn moves(&self) -> u32 {
        self.moves
    }

    pub fn side(&self) -> Side {
        self.side
    }
}

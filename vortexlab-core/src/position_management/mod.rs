//! Position management: deferred entry, protective stop, profit lock and
//! trailing ratchet, prioritized exits

pub mod manager;
pub mod ratchet;

pub use manager::{BarClose, PendingEntry, PositionManager};
pub use ratchet::{RatchetState, Side};

//! Domain types for the live engine

pub mod candle;
pub mod ids;
pub mod instrument;
pub mod leg;
pub mod position;
pub mod signal;

pub use candle::{bar_start, Candle, LiveTick};
pub use ids::PositionId;
pub use instrument::{Instrument, InstrumentKind, OptionRight, TickPolicy};
pub use leg::{AssetMappingError, Exposure, LegBook, LegCapability, LegVariant, TradeLeg};
pub use position::{ExitReason, Position, PositionStatus};
pub use signal::Signal;


//! VortexLab Core: live candle reconciliation, Vortex/Choppiness strategy
//! gate and simulated position management.
//!
//! This crate contains the trading core:
//! - Domain types (candles, ticks, instruments, legs, positions, signals)
//! - Warm-up merge and the incremental candle series
//! - Bar-close indicators (EMA, Vortex, Choppiness, ATR)
//! - Strategy gate state machine with T+1 execution
//! - Position manager with profit lock and trailing ratchet
//! - Feed bridge, consumer loop, session lifecycle and snapshots

pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod feed;
pub mod indicators;
pub mod position_management;
pub mod snapshot;
pub mod strategy;

pub use config::EngineConfig;
pub use engine::{Engine, Session, SessionController};
pub use error::EngineError;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything that crosses a thread boundary is
    /// Send, and everything shared across threads is Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Candle>();
        require_sync::<domain::Candle>();
        require_send::<domain::LiveTick>();
        require_sync::<domain::LiveTick>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::LegBook>();
        require_sync::<domain::LegBook>();

        // Engine state moved onto the consumer thread
        require_send::<engine::Engine>();
        require_send::<data::CandleSeries>();
        require_send::<strategy::StrategyGate>();
        require_send::<position_management::PositionManager>();

        // Cross-thread handoff
        require_send::<feed::FeedEvent>();
        require_send::<feed::FeedBridge>();
        require_sync::<feed::FeedBridge>();
        require_send::<feed::FeedPublisher>();
        require_sync::<feed::FeedPublisher>();
        require_send::<snapshot::SnapshotCell>();
        require_sync::<snapshot::SnapshotCell>();
        require_send::<snapshot::BotStateView>();
        require_sync::<snapshot::BotStateView>();
    }

    /// Strategy decisions only see indicator values and a summary of the book,
    /// never live position state.
    #[test]
    fn gate_takes_no_position_manager() {
        fn _check(
            gate: &mut strategy::StrategyGate,
            reading: &indicators::IndicatorReading,
            ctx: &strategy::GateContext,
        ) -> Option<strategy::PendingSignal> {
            gate.on_bar_close(0, reading, ctx)
        }
    }
}

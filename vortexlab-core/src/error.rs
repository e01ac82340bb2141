//! Engine error taxonomy.
//!
//! Only `AssetMapping` and `Config` abort a session start. Warm-up shortfalls,
//! data gaps, feed disconnects and rejected signals are recovered in place and
//! surfaced through the snapshot.

use thiserror::Error;

use crate::config::ConfigError;
use crate::data::SourceError;
use crate::domain::{AssetMappingError, Signal};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("incomplete warmup for {instrument}: {bars} bars merged, {required} required")]
    IncompleteWarmup {
        instrument: String,
        bars: usize,
        required: usize,
    },

    #[error("data gap on {instrument}: no update for {stale_for_secs}s (threshold {threshold_secs}s)")]
    DataGap {
        instrument: String,
        stale_for_secs: i64,
        threshold_secs: i64,
    },

    #[error("feed disconnected: {reason}")]
    FeedDisconnect { reason: String },

    #[error("signal {signal} discarded for {instrument}: a position is already open or pending")]
    InvalidSignalState { signal: Signal, instrument: String },

    #[error("asset mapping failed: {0}")]
    AssetMapping(#[from] AssetMappingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("a session is already running")]
    AlreadyRunning,

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Whether this error must abort the session start.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::AssetMapping(_)
                | EngineError::Config(_)
                | EngineError::Source(_)
                | EngineError::AlreadyRunning
                | EngineError::Spawn { .. }
        )
    }
}

//! Bot lifecycle state owned by the consumer.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl BotStatus {
    pub fn is_active(self) -> bool {
        matches!(self, BotStatus::Starting | BotStatus::Running)
    }
}

/// Process-wide session state. One per running session, torn down on stop.
#[derive(Debug, Clone)]
pub struct BotState {
    status: BotStatus,
    pub asset: String,
    pub last_signal: Signal,
    /// Set when warm-up came up short; the gate stays closed meanwhile.
    pub warmup_error: Option<String>,
    pub feed_connected: bool,
    pub last_feed_error: Option<String>,
}

impl BotState {
    pub fn new(asset: impl Into<String>) -> Self {
        Self {
            status: BotStatus::Starting,
            asset: asset.into(),
            last_signal: Signal::None,
            warmup_error: None,
            feed_connected: true,
            last_feed_error: None,
        }
    }

    pub fn status(&self) -> BotStatus {
        self.status
    }

    /// Move to `to`. Stopped is terminal; a stopping bot never goes back to
    /// running.
    pub fn set_status(&mut self, to: BotStatus) -> bool {
        let allowed = match (self.status, to) {
            (from, to) if from == to => false,
            (BotStatus::Stopped, _) => false,
            (BotStatus::Stopping, BotStatus::Starting | BotStatus::Running) => false,
            _ => true,
        };
        if allowed {
            info!(asset = %self.asset, from = ?self.status, to = ?to, "bot status");
            self.status = to;
        }
        allowed
    }
}

//! Consumer loop and session lifecycle.

pub mod consumer;
pub mod session;
pub mod state;

pub use consumer::Engine;
pub use session::{Session, SessionController, SessionSummary, WarmupSources};
pub use state::{BotState, BotStatus};

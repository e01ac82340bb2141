//! Feed plumbing: the producer-side handoff and the market-feed seam.

pub mod bridge;

pub use bridge::{Consumed, FeedBridge, FeedEvent, FeedPublisher, FeedStats};

use crate::domain::Instrument;

/// A push-driven market feed.
///
/// Implementations deliver on their own thread and must only ever call
/// [`FeedPublisher::publish`]; they never touch engine state. Reconnection
/// is the feed's business: report it with `Disconnected` / `Reconnected`.
pub trait MarketFeed: Send {
    fn name(&self) -> &str;

    fn subscribe(
        &mut self,
        instruments: &[Instrument],
        publisher: FeedPublisher,
    ) -> Result<(), crate::error::EngineError>;

    /// Release the subscription. Must be idempotent.
    fn unsubscribe(&mut self);
}

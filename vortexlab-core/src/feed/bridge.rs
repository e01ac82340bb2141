//! Bounded single-producer / single-consumer handoff.
//!
//! `publish` never blocks longer than the configured backpressure window.
//! When the queue is still full after that, the oldest tick or bar is dropped
//! and counted. Connectivity events are never evicted. FIFO order is kept for
//! everything that is delivered, so per-instrument order holds by
//! construction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{Candle, LiveTick};

/// What the feed hands over.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(LiveTick),
    /// A completed bar pushed by the feed itself.
    Bar { instrument: String, candle: Candle },
    Disconnected { reason: String },
    Reconnected,
}

impl FeedEvent {
    pub fn instrument(&self) -> Option<&str> {
        match self {
            FeedEvent::Tick(t) => Some(&t.instrument),
            FeedEvent::Bar { instrument, .. } => Some(instrument),
            _ => None,
        }
    }

    /// Ticks and bars carry market data; the rest are connectivity changes.
    pub fn is_data(&self) -> bool {
        self.instrument().is_some()
    }
}

/// Outcome of a consume call.
#[derive(Debug, Clone, PartialEq)]
pub enum Consumed {
    Event(FeedEvent),
    Timeout,
    /// The bridge is closed and fully drained.
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub queued: usize,
}

struct Queue {
    events: VecDeque<FeedEvent>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    backpressure: Duration,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Consumer end. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct FeedBridge {
    shared: Arc<Shared>,
}

/// Producer end handed to the feed.
#[derive(Clone)]
pub struct FeedPublisher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FeedBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedBridge")
            .field("capacity", &self.shared.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl std::fmt::Debug for FeedPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPublisher").finish_non_exhaustive()
    }
}

impl FeedBridge {
    /// Capacity is clamped to at least one slot.
    pub fn new(capacity: usize, backpressure: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    events: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
                backpressure,
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn publisher(&self) -> FeedPublisher {
        FeedPublisher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until an event is available or the bridge is closed and empty.
    pub fn consume(&self) -> Consumed {
        let mut q = self.shared.queue.lock();
        loop {
            if let Some(ev) = q.events.pop_front() {
                drop(q);
                self.delivered();
                return Consumed::Event(ev);
            }
            if q.closed {
                return Consumed::Closed;
            }
            self.shared.not_empty.wait(&mut q);
        }
    }

    /// Like [`consume`](Self::consume) but gives up after `timeout`.
    pub fn consume_timeout(&self, timeout: Duration) -> Consumed {
        let mut q = self.shared.queue.lock();
        if q.events.is_empty() && !q.closed {
            self.shared.not_empty.wait_for(&mut q, timeout);
        }
        if let Some(ev) = q.events.pop_front() {
            drop(q);
            self.delivered();
            return Consumed::Event(ev);
        }
        if q.closed {
            Consumed::Closed
        } else {
            Consumed::Timeout
        }
    }

    /// Stop accepting events and wake every waiter. Queued events stay
    /// available to the consumer.
    pub fn close(&self) {
        let mut q = self.shared.queue.lock();
        if !q.closed {
            q.closed = true;
            debug!(queued = q.events.len(), "feed bridge closed");
        }
        drop(q);
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }

    /// Throw away whatever is still queued. Returns the number discarded.
    pub fn abandon(&self) -> usize {
        let mut q = self.shared.queue.lock();
        let n = q.events.len();
        q.events.clear();
        drop(q);
        self.shared.not_full.notify_all();
        n
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            published: self.shared.published.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            queued: self.len(),
        }
    }

    fn delivered(&self) {
        self.shared.delivered.fetch_add(1, Ordering::Relaxed);
        self.shared.not_full.notify_one();
    }
}

impl Shared {
    fn record_drop(&self, event: &FeedEvent) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped.is_power_of_two() {
            warn!(
                dropped,
                instrument = event.instrument().unwrap_or("-"),
                "feed bridge full, dropping market data"
            );
        }
    }
}

impl FeedPublisher {
    /// Hand an event to the consumer.
    ///
    /// Returns `false` if the bridge is closed and the event was refused.
    pub fn publish(&self, event: FeedEvent) -> bool {
        let shared = &self.shared;
        let mut q = shared.queue.lock();
        if q.closed {
            return false;
        }

        if q.events.len() >= shared.capacity && !shared.backpressure.is_zero() {
            shared.not_full.wait_for(&mut q, shared.backpressure);
            if q.closed {
                return false;
            }
        }

        while q.events.len() >= shared.capacity {
            let oldest_data = q.events.iter().position(FeedEvent::is_data);
            match oldest_data {
                Some(i) => {
                    if let Some(old) = q.events.remove(i) {
                        shared.record_drop(&old);
                    }
                }
                None if event.is_data() => {
                    // Only connectivity events are queued; the new tick goes.
                    shared.published.fetch_add(1, Ordering::Relaxed);
                    shared.record_drop(&event);
                    return true;
                }
                None => break,
            }
        }

        q.events.push_back(event);
        shared.published.fetch_add(1, Ordering::Relaxed);
        drop(q);
        shared.not_empty.notify_one();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::thread;
    use std::time::Instant;

    fn tick(sym: &str, price: f64, sec: u32) -> FeedEvent {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(10, 0, sec)
            .unwrap();
        FeedEvent::Tick(LiveTick::new(sym, price, ts))
    }

    fn price(c: Consumed) -> f64 {
        match c {
            Consumed::Event(FeedEvent::Tick(t)) => t.ltp,
            other => panic!("expected tick, got {other:?}"),
        }
    }

    #[test]
    fn fifo_order() {
        let bridge = FeedBridge::new(8, Duration::ZERO);
        let publisher = bridge.publisher();
        for i in 0..5 {
            assert!(publisher.publish(tick("A", i as f64, i)));
        }
        for i in 0..5 {
            assert_eq!(price(bridge.consume()), i as f64);
        }
        assert_eq!(bridge.consume_timeout(Duration::from_millis(1)), Consumed::Timeout);
    }

    #[test]
    fn drop_oldest_when_full() {
        let bridge = FeedBridge::new(3, Duration::ZERO);
        let publisher = bridge.publisher();
        for i in 0..5 {
            publisher.publish(tick("A", i as f64, i));
        }
        let stats = bridge.stats();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.queued, 3);
        assert_eq!(price(bridge.consume()), 2.0);
        assert_eq!(price(bridge.consume()), 3.0);
        assert_eq!(price(bridge.consume()), 4.0);
    }

    #[test]
    fn backpressure_is_bounded() {
        let bridge = FeedBridge::new(1, Duration::from_millis(20));
        let publisher = bridge.publisher();
        publisher.publish(tick("A", 1.0, 0));
        let started = Instant::now();
        publisher.publish(tick("A", 2.0, 1));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(bridge.stats().dropped, 1);
        assert_eq!(price(bridge.consume()), 2.0);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let bridge = FeedBridge::new(4, Duration::ZERO);
        let publisher = bridge.publisher();
        publisher.publish(tick("A", 1.0, 0));
        bridge.close();
        assert!(!publisher.publish(tick("A", 2.0, 1)));
        assert_eq!(price(bridge.consume()), 1.0);
        assert_eq!(bridge.consume(), Consumed::Closed);
        assert_eq!(bridge.consume_timeout(Duration::from_millis(1)), Consumed::Closed);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let bridge = FeedBridge::new(4, Duration::ZERO);
        let consumer = bridge.clone();
        let handle = thread::spawn(move || consumer.consume());
        thread::sleep(Duration::from_millis(20));
        bridge.close();
        assert_eq!(handle.join().unwrap(), Consumed::Closed);
    }

    #[test]
    fn cross_thread_order_per_instrument() {
        let bridge = FeedBridge::new(16, Duration::from_millis(50));
        let publisher = bridge.publisher();
        let producer = thread::spawn(move || {
            for i in 0..200u32 {
                let sym = if i % 2 == 0 { "A" } else { "B" };
                publisher.publish(tick(sym, f64::from(i), i % 60));
            }
        });

        let mut last_a = -1.0;
        let mut last_b = -1.0;
        let mut seen = 0;
        while seen < 200 {
            match bridge.consume_timeout(Duration::from_millis(500)) {
                Consumed::Event(FeedEvent::Tick(t)) => {
                    let last = if t.instrument == "A" { &mut last_a } else { &mut last_b };
                    assert!(t.ltp > *last);
                    *last = t.ltp;
                    seen += 1;
                }
                Consumed::Timeout => {
                    if producer.is_finished() && bridge.is_empty() {
                        break;
                    }
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        producer.join().unwrap();
        let stats = bridge.stats();
        assert_eq!(stats.delivered + stats.dropped, 200);
    }

    #[test]
    fn overflow_never_evicts_connectivity_events() {
        let bridge = FeedBridge::new(2, Duration::ZERO);
        let publisher = bridge.publisher();
        publisher.publish(FeedEvent::Disconnected { reason: "reset".into() });
        assert!(matches!(bridge.consume(), Consumed::Event(FeedEvent::Disconnected { .. })));

        publisher.publish(FeedEvent::Reconnected);
        publisher.publish(tick("A", 100.0, 0));
        publisher.publish(tick("A", 101.0, 1));

        assert_eq!(bridge.consume(), Consumed::Event(FeedEvent::Reconnected));
        assert_eq!(price(bridge.consume()), 101.0);
        assert_eq!(bridge.stats().dropped, 1);
    }

    #[test]
    fn tick_is_dropped_when_only_connectivity_events_are_queued() {
        let bridge = FeedBridge::new(1, Duration::ZERO);
        let publisher = bridge.publisher();
        publisher.publish(FeedEvent::Reconnected);
        assert!(publisher.publish(tick("A", 100.0, 0)));
        publisher.publish(FeedEvent::Disconnected { reason: "reset".into() });

        let stats = bridge.stats();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.queued, 2);
        assert_eq!(bridge.consume(), Consumed::Event(FeedEvent::Reconnected));
        assert!(matches!(bridge.consume(), Consumed::Event(FeedEvent::Disconnected { .. })));
    }

    #[test]
    fn abandon_clears_queue() {
        let bridge = FeedBridge::new(4, Duration::ZERO);
        let publisher = bridge.publisher();
        publisher.publish(tick("A", 1.0, 0));
        publisher.publish(FeedEvent::Reconnected);
        assert_eq!(bridge.abandon(), 2);
        assert!(bridge.is_empty());
    }
}

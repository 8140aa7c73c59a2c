// src/core/hub.rs

//! In-process topic pub/sub with bounded per-subscriber buffers and a
//! non-blocking, drop-on-full slow-consumer policy.
//!
//! Mirrors the shape of the teacher's `PubSubManager` (subscribe/unsubscribe/
//! publish keyed by a map guarded by a lock) but swaps the channel primitive:
//! a `broadcast::Sender` gives every subscriber the same "lag" semantics,
//! whereas this hub's contract is "drop for that one subscriber only,
//! everyone else unaffected" (spec §4.2, §8).

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// The fixed set of topics the hub fans out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Metrics,
    Logs,
    Alerts,
    Containers,
}

impl Topic {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metrics" => Some(Topic::Metrics),
            "logs" => Some(Topic::Logs),
            "alerts" => Some(Topic::Alerts),
            "containers" => Some(Topic::Containers),
            _ => None,
        }
    }
}

/// Default bounded capacity for a subscriber's delivery channel.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// An opaque handle identifying one subscription; returned by `subscribe`
/// and required by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// A message published on the hub. Carried as pre-serialized JSON so the hub
/// itself stays generic over payload shape; callers serialize their typed
/// event once and hand the bytes to every topic subscriber.
pub type HubMessage = std::sync::Arc<serde_json::Value>;

struct Subscription {
    handle: SubscriptionHandle,
    tx: mpsc::Sender<HubMessage>,
}

/// The receiving half returned to a subscriber.
pub struct Subscriber {
    pub handle: SubscriptionHandle,
    pub topic: Topic,
    pub rx: mpsc::Receiver<HubMessage>,
}

#[derive(Default)]
struct TopicMap {
    subs: HashMap<Topic, Vec<Subscription>>,
}

/// Process-wide pub/sub hub. Cheaply cloneable (`Arc`-wrapped internally by
/// callers); all interior state is behind a `parking_lot::RwLock` per the
/// spec's RWMutex shared-resource policy (§5).
pub struct Hub {
    topics: RwLock<TopicMap>,
    next_handle: AtomicU64,
    capacity: usize,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(TopicMap::default()),
            next_handle: AtomicU64::new(1),
            capacity,
        }
    }

    /// Allocates a subscription handle and a bounded delivery channel for `topic`.
    pub fn subscribe(&self, topic: Topic) -> Subscriber {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        self.topics
            .write()
            .subs
            .entry(topic)
            .or_default()
            .push(Subscription { handle, tx });
        Subscriber { handle, topic, rx }
    }

    /// Removes the subscription under the write lock. The channel's sender is
    /// dropped here, which closes the receiver exactly once; calling this
    /// twice for the same handle is a harmless no-op the second time.
    pub fn unsubscribe(&self, topic: Topic, handle: SubscriptionHandle) {
        let mut map = self.topics.write();
        if let Some(subs) = map.subs.get_mut(&topic) {
            subs.retain(|s| s.handle != handle);
        }
    }

    /// Publishes `msg` to every current subscriber of `topic` under a read
    /// lock, delivering non-blockingly. A subscriber whose buffer is full has
    /// the message dropped for it alone; other subscribers are unaffected.
    pub fn publish<T: Serialize>(&self, topic: Topic, msg: &T) {
        let value = match serde_json::to_value(msg) {
            Ok(v) => std::sync::Arc::new(v),
            Err(e) => {
                tracing::error!("failed to serialize hub message for topic {topic:?}: {e}");
                return;
            }
        };
        let map = self.topics.read();
        if let Some(subs) = map.subs.get(&topic) {
            for sub in subs {
                // try_send never blocks; a full buffer means the message is
                // dropped for this subscriber only (slow-consumer policy).
                let _ = sub.tx.try_send(value.clone());
            }
        }
    }

    /// Number of live subscribers on `topic`, for diagnostics/tests.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .read()
            .subs
            .get(&topic)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for SubscriptionHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_drops_for_full_subscriber_only() {
        let hub = Hub::with_capacity(2);
        let mut a = hub.subscribe(Topic::Alerts);
        let mut b = hub.subscribe(Topic::Alerts);

        // Drain b as we go so only a's buffer fills.
        for i in 0..5u32 {
            hub.publish(Topic::Alerts, &i);
            let _ = b.rx.try_recv();
        }

        let mut received = 0;
        while a.rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2, "subscriber buffer of capacity 2 should deliver exactly 2");
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel_exactly_once() {
        let hub = Hub::new();
        let sub = hub.subscribe(Topic::Metrics);
        let handle = sub.handle;
        let mut rx = sub.rx;

        hub.unsubscribe(Topic::Metrics, handle);
        hub.unsubscribe(Topic::Metrics, handle); // idempotent, must not panic

        hub.publish(Topic::Metrics, &"after-unsubscribe");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn other_subscriber_unaffected_by_one_subscriber_dropping() {
        let hub = Hub::with_capacity(1);
        let a = hub.subscribe(Topic::Logs);
        let mut b = hub.subscribe(Topic::Logs);

        hub.publish(Topic::Logs, &1u32);
        hub.publish(Topic::Logs, &2u32); // a's single slot is full, drops this one

        drop(a); // a never drained; simulates a slow consumer
        assert!(b.rx.try_recv().is_ok());
    }
}

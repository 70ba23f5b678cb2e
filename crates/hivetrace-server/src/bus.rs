use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, info};

/// One `{type, data}` frame on the subscriber stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl StreamMessage {
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
        }
    }
}

/// Subscriber registry with per-subscriber queues.
///
/// Delivery is best-effort: a subscriber whose queue is full (slower than
/// the high-water mark) or whose receiver is gone is ejected on the next
/// send. Order is strict per subscriber (mpsc) and unspecified across
/// subscribers.
pub struct BroadcastBus {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<StreamMessage>>>,
    next_id: AtomicU64,
    high_water: usize,
}

impl BroadcastBus {
    pub fn new(high_water: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            high_water,
        }
    }

    pub fn subscribe(&self) -> (u64, mpsc::Receiver<StreamMessage>) {
        let (tx, rx) = mpsc::channel(self.high_water);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber lock")
            .insert(id, tx);
        info!(subscriber = id, "stream subscriber attached");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        if self
            .subscribers
            .lock()
            .expect("subscriber lock")
            .remove(&id)
            .is_some()
        {
            info!(subscriber = id, "stream subscriber detached");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock").len()
    }

    /// Deliver to every subscriber, ejecting the ones that cannot keep up.
    pub fn broadcast(&self, message: StreamMessage) {
        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.lock().expect("subscriber lock");
            for (id, tx) in subscribers.iter() {
                if tx.try_send(message.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            debug!(subscriber = id, "dropping slow or closed subscriber");
            self.unsubscribe(id);
        }
    }

    pub fn broadcast_event(&self, saved_event: Value) {
        self.broadcast(StreamMessage::new("event", saved_event));
    }

    pub fn broadcast_hook_coverage(&self, snapshot: Value) {
        self.broadcast(StreamMessage::new("hook_status_update", snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_in_order() {
        let bus = BroadcastBus::new(16);
        let (_a, mut rx_a) = bus.subscribe();
        let (_b, mut rx_b) = bus.subscribe();

        bus.broadcast_event(json!({"id": 1}));
        bus.broadcast_event(json!({"id": 2}));

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.unwrap();
            assert_eq!(first.kind, "event");
            assert_eq!(first.data, json!({"id": 1}));
            let second = rx.recv().await.unwrap();
            assert_eq!(second.data, json!({"id": 2}));
        }
    }

    #[tokio::test]
    async fn dead_subscriber_is_ejected_and_others_keep_receiving() {
        let bus = BroadcastBus::new(16);
        let (_a, mut rx_a) = bus.subscribe();
        let (_b, rx_b) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx_b);
        bus.broadcast_event(json!({"id": 1}));
        assert_eq!(bus.subscriber_count(), 1);

        assert_eq!(rx_a.recv().await.unwrap().data, json!({"id": 1}));
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_at_high_water() {
        let bus = BroadcastBus::new(2);
        let (_a, _rx_kept_but_unread) = bus.subscribe();

        bus.broadcast_event(json!({"id": 1}));
        bus.broadcast_event(json!({"id": 2}));
        assert_eq!(bus.subscriber_count(), 1);

        // Third message overflows the queue; the laggard is ejected
        bus.broadcast_event(json!({"id": 3}));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn serialized_frame_shape() {
        let msg = StreamMessage::new("terminal_status", json!({"active": []}));
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(text, r#"{"type":"terminal_status","data":{"active":[]}}"#);
    }
}

//! Broadcast-based event bus for envelope fan-out.
//!
//! Delivery is at-least-once from the consumer's perspective; subscribers
//! must be idempotent on `event_id`. Slow receivers lag and are dropped
//! rather than blocking the publisher.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::types::RuntimeEventEnvelope;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Non-blocking broadcast fan-out of published envelopes.
pub struct EventBus {
    tx: broadcast::Sender<RuntimeEventEnvelope>,
    publish_count: AtomicU64,
}

impl EventBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            publish_count: AtomicU64::new(0),
        }
    }

    /// Fan an envelope out to all subscribers. Never awaits.
    ///
    /// Returns the number of receivers that got the envelope (0 when no one
    /// is subscribed).
    pub fn publish(&self, envelope: RuntimeEventEnvelope) -> usize {
        let _ = self.publish_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(envelope).unwrap_or(0)
    }

    /// Subscribe to all envelopes published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEventEnvelope> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total envelopes published through this bus.
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    fn envelope(run_id: &str, sequence: i64) -> RuntimeEventEnvelope {
        RuntimeEventEnvelope {
            event_id: format!("e-{run_id}-{sequence}"),
            idempotency_key: "ik".into(),
            partition_key: run_id.into(),
            sequence,
            run_id: run_id.into(),
            step_id: "s".into(),
            agent_id: "implementer".into(),
            event_type: EventType::StateDelta,
            schema_version: 1,
            timestamp: "2026-01-01T00:00:00Z".into(),
            payload: serde_json::json!({"reason": "test"}),
            causal_parent_event_id: None,
        }
    }

    #[test]
    fn publish_with_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(envelope("run-1", 1)), 0);
        assert_eq!(bus.publish_count(), 1);
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(envelope("run-1", 1)), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.partition_key, "run-1");
        assert_eq!(received.sequence, 1);
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(envelope("run-1", 1)), 2);
        assert_eq!(rx1.recv().await.unwrap().sequence, 1);
        assert_eq!(rx2.recv().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for i in 1..=3 {
            let _ = bus.publish(envelope("run-1", i));
        }
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn subscriber_count_tracks_drops() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}

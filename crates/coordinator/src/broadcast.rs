//! Publish/subscribe fan-out to workers

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use runtime_core::{Result, Topic};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::message::{BroadcastPayload, SubscribeAck};

/// Receiver side of a broadcast subscription
pub type BroadcastReceiver = broadcast::Receiver<Arc<BroadcastPayload>>;

/// Transport that delivers one publish to every current subscriber
///
/// Delivery is fire-and-forget; subscribers must tolerate duplicates and
/// reordering.
pub trait BroadcastChannel: Send + Sync {
    /// Publish a payload, returning how many subscribers it reached
    fn publish(&self, topic: &str, payload: BroadcastPayload) -> Result<usize>;
}

/// In-process broadcast channel backed by one tokio broadcast per topic
#[derive(Clone)]
pub struct TokioBroadcast {
    topics: Arc<RwLock<HashMap<Topic, broadcast::Sender<Arc<BroadcastPayload>>>>>,
    capacity: usize,
}

impl TokioBroadcast {
    /// Create a channel whose topics buffer `capacity` payloads each
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a topic
    ///
    /// The returned ack is meant to be forwarded to the master.
    pub fn subscribe(&self, topic: &str, subscriber: impl Into<String>) -> (BroadcastReceiver, SubscribeAck) {
        let rx = self
            .topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let ack = SubscribeAck {
            subscriber: subscriber.into(),
            topic: topic.to_string(),
        };
        info!(subscriber = %ack.subscriber, topic = topic, "Subscribed");

        (rx, ack)
    }

    /// Current subscriber count of a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl BroadcastChannel for TokioBroadcast {
    fn publish(&self, topic: &str, payload: BroadcastPayload) -> Result<usize> {
        let kind = payload.kind();
        let delivered = match self.topics.read().get(topic) {
            // A send error only means nobody is listening right now
            Some(tx) => tx.send(Arc::new(payload)).unwrap_or(0),
            None => 0,
        };

        debug!(topic = topic, kind = kind, subscribers = delivered, "Published");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{Window, WorkUnit, BROADCAST_TOPIC};
    use tokio::sync::broadcast::error::TryRecvError;

    fn units(n: usize) -> Vec<WorkUnit> {
        (0..n)
            .map(|i| WorkUnit::Window(Window::centred(vec![format!("t{}", i)])))
            .collect()
    }

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let channel = TokioBroadcast::new(8);
        let (mut rx1, ack) = channel.subscribe(BROADCAST_TOPIC, "w1");
        let (mut rx2, _) = channel.subscribe(BROADCAST_TOPIC, "w2");
        assert_eq!(ack.topic, BROADCAST_TOPIC);
        assert_eq!(channel.subscriber_count(BROADCAST_TOPIC), 2);

        let delivered = channel
            .publish(BROADCAST_TOPIC, BroadcastPayload::WorkUnits(units(3)))
            .unwrap();
        assert_eq!(delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            let payload = rx.try_recv().unwrap();
            assert_eq!(*payload, BroadcastPayload::WorkUnits(units(3)));
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let channel = TokioBroadcast::new(8);
        let delivered = channel
            .publish("nobody", BroadcastPayload::WorkUnits(vec![]))
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_topics_are_isolated() {
        let channel = TokioBroadcast::new(8);
        let (mut other, _) = channel.subscribe("other", "w1");
        let (_main, _) = channel.subscribe(BROADCAST_TOPIC, "w2");

        channel
            .publish(BROADCAST_TOPIC, BroadcastPayload::WorkUnits(units(1)))
            .unwrap();
        assert!(matches!(other.try_recv(), Err(TryRecvError::Empty)));
    }
}

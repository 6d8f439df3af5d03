//! In-memory broker for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{BrokerError, MessageBroker, Subscription};
use crate::envelope::BrokerMessage;

/// A message parked on a topic's dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetteredMessage {
    pub topic: String,
    pub message: BrokerMessage,
    pub reason: String,
    pub description: String,
}

/// In-memory pub/sub broker.
///
/// - Fan-out per topic to every live subscription
/// - Records every publish and settlement for inspection
/// - Lock expiry and publish outages can be simulated per message/topic
/// - Abandoned messages are redelivered until `max_delivery_count` is
///   exceeded, then dead-lettered with [`MAX_DELIVERY_COUNT_EXCEEDED`]
#[derive(Debug)]
pub struct InMemoryBroker {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BrokerMessage>>>>,
    published: Mutex<Vec<(String, BrokerMessage)>>,
    completed: Mutex<Vec<(String, BrokerMessage)>>,
    dead_lettered: Mutex<Vec<DeadLetteredMessage>>,
    abandoned: Mutex<Vec<(String, BrokerMessage)>>,
    expired_locks: Mutex<HashSet<String>>,
    failing_topics: Mutex<HashSet<String>>,
    max_delivery_count: u32,
}

/// Dead-letter reason used once a message has been delivered too often.
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

/// Deliveries before an abandoned message is dead-lettered.
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            subscribers: Mutex::default(),
            published: Mutex::default(),
            completed: Mutex::default(),
            dead_lettered: Mutex::default(),
            abandoned: Mutex::default(),
            expired_locks: Mutex::default(),
            failing_topics: Mutex::default(),
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, BrokerError> {
    m.lock()
        .map_err(|_| BrokerError::Unavailable("in-memory broker lock poisoned".into()))
}

fn snapshot<T: Clone>(m: &Mutex<Vec<T>>) -> Vec<T> {
    m.lock().map(|v| v.clone()).unwrap_or_default()
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_delivery_count(mut self, max: u32) -> Self {
        self.max_delivery_count = max.max(1);
        self
    }

    /// Settlement of this message will fail with `LockLost`.
    pub fn expire_lock(&self, message_id: &str) {
        if let Ok(mut locks) = self.expired_locks.lock() {
            locks.insert(message_id.to_string());
        }
    }

    /// Publishing to `topic` will fail until [`Self::restore_topic`] is called.
    pub fn fail_topic(&self, topic: &str) {
        if let Ok(mut topics) = self.failing_topics.lock() {
            topics.insert(topic.to_string());
        }
    }

    pub fn restore_topic(&self, topic: &str) {
        if let Ok(mut topics) = self.failing_topics.lock() {
            topics.remove(topic);
        }
    }

    pub fn published(&self) -> Vec<(String, BrokerMessage)> {
        snapshot(&self.published)
    }

    pub fn published_to(&self, topic: &str) -> Vec<BrokerMessage> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn completed(&self) -> Vec<(String, BrokerMessage)> {
        snapshot(&self.completed)
    }

    pub fn dead_lettered(&self) -> Vec<DeadLetteredMessage> {
        snapshot(&self.dead_lettered)
    }

    pub fn abandoned(&self) -> Vec<(String, BrokerMessage)> {
        snapshot(&self.abandoned)
    }

    fn deliver(&self, topic: &str, message: &BrokerMessage) -> Result<(), BrokerError> {
        let mut subs = lock(&self.subscribers)?;
        if let Some(senders) = subs.get_mut(topic) {
            // Drop any dead subscribers while delivering.
            senders.retain(|tx| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    fn check_lock(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        if lock(&self.expired_locks)?.contains(message.message_id()) {
            return Err(BrokerError::lock_lost(message.message_id()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, message: BrokerMessage) -> Result<(), BrokerError> {
        if lock(&self.failing_topics)?.contains(topic) {
            return Err(BrokerError::Unavailable(format!("topic {topic} rejected publish")));
        }

        lock(&self.published)?.push((topic.to_string(), message.clone()));
        self.deliver(topic, &message)?;
        tracing::trace!(topic, message_id = message.message_id(), "published");
        Ok(())
    }

    async fn complete(&self, topic: &str, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.check_lock(message)?;
        lock(&self.completed)?.push((topic.to_string(), message.clone()));
        Ok(())
    }

    async fn dead_letter(
        &self,
        topic: &str,
        message: &BrokerMessage,
        reason: &str,
        description: &str,
    ) -> Result<(), BrokerError> {
        self.check_lock(message)?;
        lock(&self.dead_lettered)?.push(DeadLetteredMessage {
            topic: topic.to_string(),
            message: message.clone(),
            reason: reason.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    async fn abandon(&self, topic: &str, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.check_lock(message)?;
        lock(&self.abandoned)?.push((topic.to_string(), message.clone()));

        let redelivery = message.redelivered();
        if redelivery.delivery_count() > self.max_delivery_count {
            tracing::warn!(topic, message_id = message.message_id(), "delivery count exceeded");
            lock(&self.dead_lettered)?.push(DeadLetteredMessage {
                topic: topic.to_string(),
                message: message.clone(),
                reason: MAX_DELIVERY_COUNT_EXCEEDED.to_string(),
                description: format!("abandoned after {} deliveries", message.delivery_count()),
            });
            return Ok(());
        }
        self.deliver(topic, &redelivery)
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        // A poisoned lock still yields a subscription; it just never
        // receives messages.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.entry(topic.to_string()).or_default().push(tx);
        }

        Subscription::new(topic, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::topics;

    #[tokio::test]
    async fn fans_out_per_topic() {
        let broker = InMemoryBroker::new();
        let mut main_a = broker.subscribe(topics::MAIN);
        let mut main_b = broker.subscribe(topics::MAIN);
        let mut retry = broker.subscribe(topics::RETRY);

        let msg = BrokerMessage::new(b"hello".to_vec());
        broker.publish(topics::MAIN, msg.clone()).await.unwrap();

        assert_eq!(main_a.recv().await, Some(msg.clone()));
        assert_eq!(main_b.recv().await, Some(msg));
        assert!(retry.try_recv().is_none());
        assert_eq!(broker.published_to(topics::MAIN).len(), 1);
    }

    #[tokio::test]
    async fn expired_lock_fails_settlement() {
        let broker = InMemoryBroker::new();
        let msg = BrokerMessage::new(Vec::new());
        broker.expire_lock(msg.message_id());

        let err = broker.complete(topics::MAIN, &msg).await.unwrap_err();
        assert!(err.is_lock_lost());
        let err = broker
            .dead_letter(topics::MAIN, &msg, "reason", "description")
            .await
            .unwrap_err();
        assert!(err.is_lock_lost());
        assert!(broker.completed().is_empty());
    }

    #[tokio::test]
    async fn abandoned_message_is_redelivered_until_the_cap() {
        let broker = InMemoryBroker::new().with_max_delivery_count(2);
        let mut sub = broker.subscribe(topics::AUDIT);
        broker
            .publish(topics::AUDIT, BrokerMessage::new(b"x".to_vec()))
            .await
            .unwrap();

        let first = sub.recv().await.unwrap();
        broker.abandon(topics::AUDIT, &first).await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(second.message_id(), first.message_id());
        assert_eq!(second.delivery_count(), 2);

        broker.abandon(topics::AUDIT, &second).await.unwrap();
        assert!(sub.try_recv().is_none());
        let dead = broker.dead_lettered();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, MAX_DELIVERY_COUNT_EXCEEDED);
        assert_eq!(broker.abandoned().len(), 2);
        assert_eq!(broker.published_to(topics::AUDIT).len(), 1);
    }

    #[tokio::test]
    async fn failing_topic_rejects_publish() {
        let broker = InMemoryBroker::new();
        broker.fail_topic(topics::RETRY);
        assert!(broker
            .publish(topics::RETRY, BrokerMessage::new(Vec::new()))
            .await
            .is_err());
        broker.restore_topic(topics::RETRY);
        assert!(broker
            .publish(topics::RETRY, BrokerMessage::new(Vec::new()))
            .await
            .is_ok());
    }
}

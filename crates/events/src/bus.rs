//! Topic-based message broker abstraction (mechanics only).
//!
//! The pipeline talks to its pub/sub transport exclusively through
//! [`MessageBroker`]. Delivery is **at-least-once**: a message stays locked to
//! its receiver until it is completed or dead-lettered, and is redelivered if
//! the lock expires first. Handlers must therefore be idempotent.
//!
//! ## Settlement
//!
//! Every delivered message ends in exactly one of:
//! - `complete`: processing finished (or the message was forwarded elsewhere)
//! - `dead_letter`: the message can never succeed; it is parked with a reason
//!   for operators
//!
//! If the receiver's lock has already expired, settlement fails with
//! [`BrokerError::LockLost`]. That error is never retried locally since the
//! broker has already scheduled a redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::envelope::BrokerMessage;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The message lock expired before settlement; the broker will redeliver.
    #[error("message lock lost for {message_id}")]
    LockLost { message_id: String },

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl BrokerError {
    pub fn lock_lost(message_id: impl Into<String>) -> Self {
        Self::LockLost {
            message_id: message_id.into(),
        }
    }

    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockLost { .. })
    }
}

/// A subscription to one topic.
///
/// Each subscription receives its own copy of every message published to the
/// topic after it was created.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: mpsc::UnboundedReceiver<BrokerMessage>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: mpsc::UnboundedReceiver<BrokerMessage>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message. `None` once the broker is gone.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BrokerMessage> {
        self.receiver.try_recv().ok()
    }
}

/// Pub/sub broker with named topics.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: &str, message: BrokerMessage) -> Result<(), BrokerError>;

    /// Settle a delivered message as done.
    async fn complete(&self, topic: &str, message: &BrokerMessage) -> Result<(), BrokerError>;

    /// Park a delivered message with an operator-facing reason.
    async fn dead_letter(
        &self,
        topic: &str,
        message: &BrokerMessage,
        reason: &str,
        description: &str,
    ) -> Result<(), BrokerError>;

    /// Release the lock without settling; the broker redelivers the message
    /// with an incremented delivery count.
    async fn abandon(&self, topic: &str, message: &BrokerMessage) -> Result<(), BrokerError>;

    fn subscribe(&self, topic: &str) -> Subscription;
}

#[async_trait]
impl<B> MessageBroker for Arc<B>
where
    B: MessageBroker + ?Sized,
{
    async fn publish(&self, topic: &str, message: BrokerMessage) -> Result<(), BrokerError> {
        (**self).publish(topic, message).await
    }

    async fn complete(&self, topic: &str, message: &BrokerMessage) -> Result<(), BrokerError> {
        (**self).complete(topic, message).await
    }

    async fn dead_letter(
        &self,
        topic: &str,
        message: &BrokerMessage,
        reason: &str,
        description: &str,
    ) -> Result<(), BrokerError> {
        (**self).dead_letter(topic, message, reason, description).await
    }

    async fn abandon(&self, topic: &str, message: &BrokerMessage) -> Result<(), BrokerError> {
        (**self).abandon(topic, message).await
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        (**self).subscribe(topic)
    }
}

//! Topic handlers binding each receiver to its worker.

use std::sync::Arc;

use async_trait::async_trait;

use approvals_events::{BrokerMessage, MessageBroker};

use crate::audit_agent::AuditAgent;
use crate::receiver::{ActionableEmailReceiver, MainTopicReceiver, NotificationTopicReceiver};

use super::MessageHandler;

pub struct MainTopicHandler(pub Arc<MainTopicReceiver>);

#[async_trait]
impl MessageHandler for MainTopicHandler {
    fn name(&self) -> &'static str {
        "main-topic"
    }

    async fn handle(&self, message: BrokerMessage) -> anyhow::Result<()> {
        let outcome = self.0.on_main_message_received(message.blob_id(), &message).await?;
        tracing::debug!(message_id = message.message_id(), ?outcome, "main message settled");
        Ok(())
    }
}

pub struct RetryTopicHandler(pub Arc<MainTopicReceiver>);

#[async_trait]
impl MessageHandler for RetryTopicHandler {
    fn name(&self) -> &'static str {
        "retry-topic"
    }

    async fn handle(&self, message: BrokerMessage) -> anyhow::Result<()> {
        let outcome = self.0.on_retry_message_received(message.blob_id(), &message).await?;
        tracing::debug!(message_id = message.message_id(), ?outcome, "retry message settled");
        Ok(())
    }
}

pub struct NotificationTopicHandler(pub Arc<NotificationTopicReceiver>);

#[async_trait]
impl MessageHandler for NotificationTopicHandler {
    fn name(&self) -> &'static str {
        "notification-topic"
    }

    async fn handle(&self, message: BrokerMessage) -> anyhow::Result<()> {
        let outcome = self
            .0
            .on_notification_message_received(message.blob_id(), &message)
            .await?;
        tracing::debug!(message_id = message.message_id(), ?outcome, "notification message settled");
        Ok(())
    }
}

pub struct ActionableEmailHandler(pub Arc<ActionableEmailReceiver>);

#[async_trait]
impl MessageHandler for ActionableEmailHandler {
    fn name(&self) -> &'static str {
        "actionable-email-topic"
    }

    async fn handle(&self, message: BrokerMessage) -> anyhow::Result<()> {
        let outcome = self
            .0
            .on_actionable_message_received(message.blob_id(), &message)
            .await?;
        tracing::debug!(message_id = message.message_id(), ?outcome, "actionable message settled");
        Ok(())
    }
}

/// Settles audit messages: complete on success (even when single writes
/// failed), dead-letter when the batch can never succeed, abandon for
/// redelivery otherwise.
pub struct AuditTopicHandler {
    pub agent: Arc<AuditAgent>,
    pub broker: Arc<dyn MessageBroker>,
    pub topic: String,
}

#[async_trait]
impl MessageHandler for AuditTopicHandler {
    fn name(&self) -> &'static str {
        "audit-topic"
    }

    async fn handle(&self, message: BrokerMessage) -> anyhow::Result<()> {
        match self.agent.process_message(message.blob_id(), &message).await {
            Ok(report) => {
                if !report.failed.is_empty() {
                    tracing::warn!(
                        message_id = message.message_id(),
                        failed = report.failed.len(),
                        succeeded = report.succeeded.len(),
                        "audit batch partially written"
                    );
                }
                self.broker.complete(&self.topic, &message).await?;
            }
            Err(err) if err.is_permanent() => {
                self.broker
                    .dead_letter(&self.topic, &message, err.reason(), &err.to_string())
                    .await?;
            }
            Err(err) => {
                tracing::warn!(
                    message_id = message.message_id(),
                    delivery_count = message.delivery_count(),
                    error = %err,
                    "audit batch failed, abandoning for redelivery"
                );
                self.broker.abandon(&self.topic, &message).await?;
            }
        }
        Ok(())
    }
}

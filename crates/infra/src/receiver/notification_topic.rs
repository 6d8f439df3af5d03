//! Notification topic receiver.
//!
//! Loading and decoding the payload is retried; dispatch is not, since the
//! processors never fail and a resend would duplicate emails. Whatever the
//! outcome, the payload blob is deleted once the message is settled.

use std::sync::Arc;

use approvals_arx::{ApprovalNotificationDetails, ArxConverter};
use approvals_events::{BrokerMessage, MessageBroker};
use approvals_observability::{PerfScope, TrackingEntry, TrackingEvent, TrackingSink, best_effort, fields};

use crate::blob_store::BlobStore;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::notification::{NotificationProcessor, TeamsNotifier};
use crate::retry::{RetryError, RetryPolicy};
use crate::tenant_registry::TenantRegistry;

use super::{ProcessingOutcome, discard_blob, message_entry, require_payload};

pub struct NotificationTopicReceiver {
    config: Arc<PipelineConfig>,
    policy: RetryPolicy,
    converter: ArxConverter,
    broker: Arc<dyn MessageBroker>,
    blobs: Arc<dyn BlobStore>,
    tenants: Arc<dyn TenantRegistry>,
    processor: Arc<NotificationProcessor>,
    teams: Arc<TeamsNotifier>,
    tracking: Arc<dyn TrackingSink>,
}

impl NotificationTopicReceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<PipelineConfig>,
        converter: ArxConverter,
        broker: Arc<dyn MessageBroker>,
        blobs: Arc<dyn BlobStore>,
        tenants: Arc<dyn TenantRegistry>,
        processor: Arc<NotificationProcessor>,
        teams: Arc<TeamsNotifier>,
        tracking: Arc<dyn TrackingSink>,
    ) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config),
            config,
            converter,
            broker,
            blobs,
            tenants,
            processor,
            teams,
            tracking,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn on_notification_message_received(
        &self,
        blob_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let topic = self.config.topics.notification.as_str();
        let _scope = PerfScope::start("notification_topic_receiver", message.message_id());
        self.track(message_entry(TrackingEvent::NotificationMessageReceived, topic, message));

        let prepared = self
            .policy
            .run(|_| self.prepare(blob_id, message))
            .await;

        let outcome = match prepared {
            Ok(batch) => {
                for mut details in batch {
                    self.dispatch(&mut details).await;
                }
                self.broker.complete(topic, message).await?;
                ProcessingOutcome::Acknowledged
            }
            Err(RetryError { error, .. }) if error.is_lock_lost() => return Err(error),
            Err(RetryError { error, attempts }) => {
                tracing::error!(topic, message_id = message.message_id(), attempts, error = %error, "dead-lettering notification message");
                self.broker
                    .dead_letter(topic, message, error.reason(), &error.description())
                    .await?;
                self.track(
                    message_entry(TrackingEvent::NotificationDeadLettered, topic, message)
                        .field(fields::ATTEMPT, attempts)
                        .field(fields::ERROR, &error),
                );
                ProcessingOutcome::DeadLettered
            }
        };

        discard_blob(self.blobs.as_ref(), &self.config.containers.notification, blob_id).await;
        Ok(outcome)
    }

    /// Decode the payload into one notification per expression.
    async fn prepare(
        &self,
        blob_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<Vec<ApprovalNotificationDetails>, PipelineError> {
        let payload = require_payload(
            self.blobs.as_ref(),
            &self.config.containers.notification,
            blob_id,
            message,
        )
        .await?;

        if message.is_notification_details() {
            return Ok(vec![self.converter.convert_details(&payload)?]);
        }

        let mut batch = Vec::new();
        for arx in self.converter.convert(&payload)? {
            let id = arx
                .document_type_id
                .ok_or_else(|| PipelineError::TenantNotFound("<missing>".to_string()))?;
            let tenant = self
                .tenants
                .find_tenant(&id)
                .await?
                .ok_or_else(|| PipelineError::TenantNotFound(id.to_string()))?;
            batch.push(ApprovalNotificationDetails::from_expression(arx, tenant, Vec::new()));
        }
        Ok(batch)
    }

    async fn dispatch(&self, details: &mut ApprovalNotificationDetails) {
        if details.notifications_suppressed() {
            tracing::debug!(document_number = details.document_number(), "notifications suppressed");
            return;
        }
        let tenant = details.tenant.clone();
        let emailed = self.processor.send_notifications(details, &tenant).await;
        let teams = self.teams.send_teams_notifications(details).await;
        tracing::info!(
            document_number = details.document_number(),
            emailed,
            teams,
            failure_reason = details
                .device_notification_info
                .as_ref()
                .and_then(|i| i.failure_reason.as_deref()),
            "notification dispatched"
        );
    }

    fn track(&self, entry: TrackingEntry) {
        best_effort(self.tracking.as_ref(), entry);
    }
}

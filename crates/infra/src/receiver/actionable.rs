//! Actionable-email topic receiver.

use std::sync::Arc;

use approvals_arx::ArxConverter;
use approvals_events::{BrokerMessage, MessageBroker, properties};
use approvals_observability::{PerfScope, TrackingEntry, TrackingEvent, TrackingSink, best_effort, fields};

use crate::blob_store::BlobStore;
use crate::collaborators::{EmailClient, EmailMessage};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::retry::{RetryError, RetryPolicy};

use super::{ProcessingOutcome, discard_blob, message_entry, require_payload};

/// Sends actionable emails queued by the notification processor. Both the
/// details blob and the screenshot blob are deleted once settled.
pub struct ActionableEmailReceiver {
    config: Arc<PipelineConfig>,
    policy: RetryPolicy,
    converter: ArxConverter,
    broker: Arc<dyn MessageBroker>,
    blobs: Arc<dyn BlobStore>,
    email: Arc<dyn EmailClient>,
    tracking: Arc<dyn TrackingSink>,
}

impl ActionableEmailReceiver {
    pub fn new(
        config: Arc<PipelineConfig>,
        converter: ArxConverter,
        broker: Arc<dyn MessageBroker>,
        blobs: Arc<dyn BlobStore>,
        email: Arc<dyn EmailClient>,
        tracking: Arc<dyn TrackingSink>,
    ) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config),
            config,
            converter,
            broker,
            blobs,
            email,
            tracking,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn on_actionable_message_received(
        &self,
        blob_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let topic = self.config.topics.actionable_email.as_str();
        let _scope = PerfScope::start("actionable_email_receiver", message.message_id());
        let screenshot_id = message
            .property(properties::SCREENSHOT_BLOB_ID)
            .filter(|id| !id.trim().is_empty());

        let result = self
            .policy
            .run(|_| self.send(blob_id, screenshot_id, message))
            .await;

        let outcome = match result {
            Ok(recipients) => {
                self.broker.complete(topic, message).await?;
                self.track(
                    message_entry(TrackingEvent::ActionableEmailSent, topic, message)
                        .field(fields::COUNT, recipients),
                );
                ProcessingOutcome::Acknowledged
            }
            Err(RetryError { error, .. }) if error.is_lock_lost() => return Err(error),
            Err(RetryError { error, attempts }) => {
                tracing::error!(topic, message_id = message.message_id(), attempts, error = %error, "dead-lettering actionable email");
                self.broker
                    .dead_letter(topic, message, error.reason(), &error.description())
                    .await?;
                self.track(
                    message_entry(TrackingEvent::ActionableEmailFailed, topic, message)
                        .field(fields::ATTEMPT, attempts)
                        .field(fields::ERROR, &error),
                );
                ProcessingOutcome::DeadLettered
            }
        };

        let container = &self.config.containers.notification;
        discard_blob(self.blobs.as_ref(), container, blob_id).await;
        discard_blob(self.blobs.as_ref(), container, screenshot_id).await;
        Ok(outcome)
    }

    async fn send(
        &self,
        blob_id: Option<&str>,
        screenshot_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<usize, PipelineError> {
        let container = &self.config.containers.notification;
        let payload = require_payload(self.blobs.as_ref(), container, blob_id, message).await?;
        let details = self.converter.convert_details(&payload)?;

        let screenshot_id = screenshot_id.ok_or_else(|| PipelineError::MissingPayload {
            message_id: message.message_id().to_string(),
        })?;
        let screenshot = self.blobs.download_byte_array(container, screenshot_id).await?;

        let template_key = details
            .device_notification_info
            .as_ref()
            .map(|i| i.notification_template_key.as_str())
            .unwrap_or_default();
        let email = EmailMessage::from_details(&details, template_key);
        self.email.send_actionable_email(&email, &screenshot).await?;
        Ok(email.to.len())
    }

    fn track(&self, entry: TrackingEntry) {
        best_effort(self.tracking.as_ref(), entry);
    }
}

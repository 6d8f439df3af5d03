//! Main and retry topic receiver.
//!
//! `Received -> Validated -> Processed -> Acknowledged` on success. Invalid
//! payloads are dead-lettered at once. Transient failures are retried in
//! place; once the budget is spent the message moves from the main topic to
//! the retry topic, and from the retry topic to the dead-letter queue.

use std::sync::Arc;

use uuid::Uuid;

use approvals_arx::{
    ApprovalNotificationDetails, ApprovalRequestExpression, ApprovalTenantInfo, ArxConverter,
    ArxValidator, Operation, ValidationFailure, Validator,
};
use approvals_events::{BrokerMessage, MessageBroker, properties};
use approvals_observability::{PerfScope, TrackingEntry, TrackingEvent, TrackingSink, best_effort, fields};

use crate::blob_store::BlobStore;
use crate::collaborators::TenantBusinessLogic;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::retry::{RetryError, RetryPolicy};
use crate::tenant_registry::TenantRegistry;

use super::{
    ProcessingOutcome, QueuedNotifications, discard_blob, forward_for_retry, message_entry,
    require_payload,
};

pub struct MainTopicReceiver {
    config: Arc<PipelineConfig>,
    policy: RetryPolicy,
    converter: ArxConverter,
    validator: Arc<ArxValidator>,
    broker: Arc<dyn MessageBroker>,
    blobs: Arc<dyn BlobStore>,
    tenants: Arc<dyn TenantRegistry>,
    logic: Arc<dyn TenantBusinessLogic>,
    tracking: Arc<dyn TrackingSink>,
}

impl MainTopicReceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<PipelineConfig>,
        converter: ArxConverter,
        validator: Arc<ArxValidator>,
        broker: Arc<dyn MessageBroker>,
        blobs: Arc<dyn BlobStore>,
        tenants: Arc<dyn TenantRegistry>,
        logic: Arc<dyn TenantBusinessLogic>,
        tracking: Arc<dyn TrackingSink>,
    ) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config),
            config,
            converter,
            validator,
            broker,
            blobs,
            tenants,
            logic,
            tracking,
        }
    }

    /// Override the retry policy derived from the configuration.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn on_main_message_received(
        &self,
        blob_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let topic = self.config.topics.main.clone();
        self.receive(&topic, false, blob_id, message).await
    }

    pub async fn on_retry_message_received(
        &self,
        blob_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let topic = self.config.topics.retry.clone();
        self.receive(&topic, true, blob_id, message).await
    }

    async fn receive(
        &self,
        topic: &str,
        from_retry_topic: bool,
        blob_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let _scope = PerfScope::start("main_topic_receiver", message.message_id());
        self.track(message_entry(TrackingEvent::MainMessageReceived, topic, message));

        let queued = QueuedNotifications::from_message(message);
        let result = self
            .policy
            .run(|attempt| self.attempt(topic, blob_id, message, &queued, attempt))
            .await;

        let outcome = match result {
            Ok(()) => self.acknowledge(topic, blob_id, message).await,
            Err(RetryError { error, attempts }) => {
                self.settle_failure(topic, from_retry_topic, blob_id, message, &queued, error, attempts)
                    .await
            }
        };

        if let Err(err) = &outcome {
            if err.is_lock_lost() {
                tracing::warn!(topic, message_id = message.message_id(), "message lock lost");
                self.track(
                    message_entry(TrackingEvent::MessageLockLost, topic, message)
                        .field(fields::ERROR, err),
                );
            }
        }
        outcome
    }

    async fn attempt(
        &self,
        topic: &str,
        blob_id: Option<&str>,
        message: &BrokerMessage,
        queued: &QueuedNotifications,
        attempt: u32,
    ) -> Result<(), PipelineError> {
        let result = self.process(blob_id, message, queued).await;
        if let Err(err) = &result {
            if !err.is_permanent() && !err.is_lock_lost() {
                self.track(
                    message_entry(TrackingEvent::ProcessingAttemptFailed, topic, message)
                        .field(fields::ATTEMPT, attempt)
                        .field(fields::ERROR, err),
                );
            }
        }
        result
    }

    /// One full pass over the batch. Tenant persistence is idempotent and is
    /// finished for every entry before any notification is queued; entries
    /// already in `queued` are not queued again.
    async fn process(
        &self,
        blob_id: Option<&str>,
        message: &BrokerMessage,
        queued: &QueuedNotifications,
    ) -> Result<(), PipelineError> {
        let payload =
            require_payload(self.blobs.as_ref(), &self.config.containers.main, blob_id, message).await?;
        let batch = self.converter.convert(&payload)?;

        let failures: Vec<ValidationFailure> = batch
            .iter()
            .flat_map(|arx| self.validator.validate(arx))
            .collect();
        if !failures.is_empty() {
            return Err(PipelineError::Validation(failures));
        }

        let mut pending = Vec::new();
        for (index, arx) in batch.iter().enumerate() {
            let tenant = self.resolve_tenant(arx).await?;
            let rows = self.logic.process_approval(arx, &tenant).await?;
            self.track(arx_entry(TrackingEvent::ArxProcessed, arx, message).field(fields::TENANT, &tenant.app_name));

            if !queued.contains(index) && should_notify(arx, &tenant) {
                pending.push((index, ApprovalNotificationDetails::from_expression(arx.clone(), tenant, rows)));
            }
        }

        for (index, details) in pending {
            self.queue_notification(&details, message).await?;
            queued.insert(index);
        }
        Ok(())
    }

    async fn resolve_tenant(&self, arx: &ApprovalRequestExpression) -> Result<ApprovalTenantInfo, PipelineError> {
        let id = arx
            .document_type_id
            .ok_or_else(|| PipelineError::TenantNotFound("<missing>".to_string()))?;
        self.tenants
            .find_tenant(&id)
            .await?
            .ok_or_else(|| PipelineError::TenantNotFound(id.to_string()))
    }

    async fn queue_notification(
        &self,
        details: &ApprovalNotificationDetails,
        source: &BrokerMessage,
    ) -> Result<(), PipelineError> {
        let blob_id = Uuid::now_v7().to_string();
        let body = serde_json::to_vec(details)?;
        self.blobs
            .upload_stream_data(&self.config.containers.notification, &blob_id, body)
            .await?;

        let message = BrokerMessage::for_blob(&blob_id).with_property(properties::NOTIFICATION_DETAILS, "true");
        if let Err(err) = self.broker.publish(&self.config.topics.notification, message).await {
            discard_blob(self.blobs.as_ref(), &self.config.containers.notification, Some(blob_id.as_str())).await;
            return Err(err.into());
        }

        self.track(
            arx_entry(TrackingEvent::NotificationDetailsQueued, &details.expression, source)
                .field(fields::BLOB_ID, &blob_id),
        );
        Ok(())
    }

    async fn acknowledge(
        &self,
        topic: &str,
        blob_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<ProcessingOutcome, PipelineError> {
        self.broker.complete(topic, message).await?;
        discard_blob(self.blobs.as_ref(), &self.config.containers.main, blob_id).await;
        self.track(message_entry(TrackingEvent::MessageCompleted, topic, message));
        Ok(ProcessingOutcome::Acknowledged)
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle_failure(
        &self,
        topic: &str,
        from_retry_topic: bool,
        blob_id: Option<&str>,
        message: &BrokerMessage,
        queued: &QueuedNotifications,
        error: PipelineError,
        attempts: u32,
    ) -> Result<ProcessingOutcome, PipelineError> {
        if error.is_lock_lost() {
            return Err(error);
        }

        if error.is_permanent() {
            tracing::warn!(topic, message_id = message.message_id(), reason = error.reason(), error = %error, "dead-lettering invalid message");
            self.broker
                .dead_letter(topic, message, error.reason(), &error.description())
                .await?;
            let event = match &error {
                PipelineError::Validation(_) => TrackingEvent::ArxValidationFailed,
                PipelineError::TenantNotFound(_) => TrackingEvent::TenantNotFound,
                _ => TrackingEvent::InvalidPayloadDeadLettered,
            };
            self.track(
                message_entry(event, topic, message)
                    .field(fields::REASON, error.reason())
                    .field(fields::ERROR, error.description()),
            );
            return Ok(ProcessingOutcome::DeadLettered);
        }

        if from_retry_topic {
            tracing::error!(topic, message_id = message.message_id(), attempts, error = %error, "retry budget exhausted on retry topic");
            self.broker
                .dead_letter(topic, message, "RetriesExhausted", &error.to_string())
                .await?;
            discard_blob(self.blobs.as_ref(), &self.config.containers.main, blob_id).await;
            self.track(
                message_entry(TrackingEvent::DeadLetteredFromRetryTopic, topic, message)
                    .field(fields::ATTEMPT, attempts)
                    .field(fields::ERROR, &error),
            );
            return Ok(ProcessingOutcome::DeadLettered);
        }

        let forwarded = queued.stamp(forward_for_retry(message));
        self.broker
            .publish(&self.config.topics.retry, forwarded)
            .await?;
        self.broker.complete(topic, message).await?;
        tracing::warn!(topic, message_id = message.message_id(), attempts, error = %error, "moved to retry topic");
        self.track(
            message_entry(TrackingEvent::MovedToRetryTopic, topic, message)
                .field(fields::ATTEMPT, attempts)
                .field(fields::ERROR, &error),
        );
        Ok(ProcessingOutcome::MovedToRetryTopic)
    }

    fn track(&self, entry: TrackingEntry) {
        best_effort(self.tracking.as_ref(), entry);
    }
}

/// Notify when the expression asks for it, or when the tenant has a channel
/// and the operation puts something in front of approvers.
fn should_notify(arx: &ApprovalRequestExpression, tenant: &ApprovalTenantInfo) -> bool {
    match &arx.notification_detail {
        Some(detail) => detail.send_notification,
        None => {
            tenant.has_notification_channel()
                && matches!(arx.operation, Operation::Create | Operation::Update)
        }
    }
}

pub(crate) fn arx_entry(
    event: TrackingEvent,
    arx: &ApprovalRequestExpression,
    message: &BrokerMessage,
) -> TrackingEntry {
    let telemetry = arx.telemetry_or_default();
    TrackingEntry::new(event)
        .field(fields::MESSAGE_ID, message.message_id())
        .field(fields::XCV, telemetry.xcv)
        .field(fields::TCV, telemetry.tcv)
        .field_opt(fields::DOCUMENT_TYPE_ID, arx.document_type_id)
        .field(fields::DOCUMENT_NUMBER, arx.document_number())
        .field(fields::OPERATION, arx.operation)
}

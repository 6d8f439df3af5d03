use std::sync::Arc;

use uuid::Uuid;

use approvals_arx::{ApprovalNotificationDetails, ApprovalTenantInfo};
use approvals_events::{BrokerMessage, MessageBroker, properties};
use approvals_observability::{TrackingEvent, TrackingSink, best_effort, fields};

use crate::blob_store::BlobStore;
use crate::collaborators::{ActionableRenderer, EmailClient, EmailMessage, TenantBusinessLogic};
use crate::config::PipelineConfig;
use crate::receiver::discard_blob;

use super::details_entry;

/// Decides which email paths a notification takes and dispatches them.
pub struct NotificationProcessor {
    config: Arc<PipelineConfig>,
    broker: Arc<dyn MessageBroker>,
    blobs: Arc<dyn BlobStore>,
    email: Arc<dyn EmailClient>,
    renderer: Arc<dyn ActionableRenderer>,
    policy: Arc<dyn TenantBusinessLogic>,
    tracking: Arc<dyn TrackingSink>,
}

impl NotificationProcessor {
    pub fn new(
        config: Arc<PipelineConfig>,
        broker: Arc<dyn MessageBroker>,
        blobs: Arc<dyn BlobStore>,
        email: Arc<dyn EmailClient>,
        renderer: Arc<dyn ActionableRenderer>,
        policy: Arc<dyn TenantBusinessLogic>,
        tracking: Arc<dyn TrackingSink>,
    ) -> Self {
        Self {
            config,
            broker,
            blobs,
            email,
            renderer,
            policy,
            tracking,
        }
    }

    /// Send the email notifications for `details`.
    ///
    /// Returns `false` only when the notification has no routing info.
    /// Failures on either path are appended to the notification's failure
    /// reason and do not stop the other path.
    pub async fn send_notifications(
        &self,
        details: &mut ApprovalNotificationDetails,
        tenant: &ApprovalTenantInfo,
    ) -> bool {
        let Some(template_key) = details
            .device_notification_info
            .as_ref()
            .map(|i| i.notification_template_key.clone())
        else {
            tracing::warn!(
                document_number = details.document_number(),
                "notification has no device notification info"
            );
            self.track(details_entry(TrackingEvent::DeviceNotificationInfoMissing, details));
            return false;
        };

        let mut actionable_sent = false;
        if tenant.supports_actionable_email(&template_key) {
            match self.policy.should_send_actionable_email(details).await {
                Ok(true) => match self.queue_actionable(details, &template_key).await {
                    Ok(()) => {
                        actionable_sent = true;
                        self.track(details_entry(TrackingEvent::ActionableEmailQueued, details));
                    }
                    Err(err) => self.record_failure(details, TrackingEvent::ActionableEmailFailed, &err),
                },
                Ok(false) => {}
                Err(err) => self.record_failure(details, TrackingEvent::ActionableEmailFailed, &err),
            }
        }

        if tenant.notify_email {
            match self.policy.should_send_regular_email(details, actionable_sent).await {
                Ok(true) => {
                    let message = EmailMessage::from_details(details, &template_key);
                    match self.email.send_email(&message).await {
                        Ok(()) => self.track(
                            details_entry(TrackingEvent::EmailSent, details)
                                .field(fields::COUNT, message.to.len()),
                        ),
                        Err(err) => self.record_failure(details, TrackingEvent::EmailFailed, &err),
                    }
                }
                Ok(false) => {}
                Err(err) => self.record_failure(details, TrackingEvent::EmailFailed, &err),
            }
        }

        self.track(details_entry(TrackingEvent::NotificationProcessingCompleted, details));
        true
    }

    /// Render the preview, persist it alongside the details, and hand both
    /// to the actionable-email topic under the suffixed template key.
    async fn queue_actionable(
        &self,
        details: &ApprovalNotificationDetails,
        template_key: &str,
    ) -> anyhow::Result<()> {
        let actionable_key = format!("{template_key}{}", self.config.actionable_template_suffix);

        let mut actionable = details.clone();
        if let Some(info) = actionable.device_notification_info.as_mut() {
            info.notification_template_key = actionable_key.clone();
        }

        let screenshot = self
            .renderer
            .render_screenshot(&actionable, &actionable_key)
            .await?;

        let container = &self.config.containers.notification;
        let screenshot_id = Uuid::now_v7().to_string();
        let details_id = Uuid::now_v7().to_string();

        let body = serde_json::to_vec(&actionable)?;
        self.blobs
            .upload_stream_data(container, &screenshot_id, screenshot)
            .await?;

        let message = BrokerMessage::for_blob(&details_id)
            .with_property(properties::NOTIFICATION_DETAILS, "true")
            .with_property(properties::SCREENSHOT_BLOB_ID, &screenshot_id);
        let queued = match self.blobs.upload_stream_data(container, &details_id, body).await {
            Ok(()) => self
                .broker
                .publish(&self.config.topics.actionable_email, message)
                .await
                .map_err(anyhow::Error::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = queued {
            for id in [&screenshot_id, &details_id] {
                discard_blob(self.blobs.as_ref(), container, Some(id.as_str())).await;
            }
            return Err(err);
        }

        tracing::debug!(
            document_number = details.document_number(),
            template_key = %actionable_key,
            blob_id = %details_id,
            "actionable email queued"
        );
        Ok(())
    }

    fn record_failure(
        &self,
        details: &mut ApprovalNotificationDetails,
        event: TrackingEvent,
        err: &anyhow::Error,
    ) {
        tracing::warn!(
            document_number = details.document_number(),
            event = ?event,
            error = %format!("{err:#}"),
            "notification channel failed"
        );
        if let Some(info) = details.device_notification_info.as_mut() {
            info.record_failure(format!("{err:#}"));
        }
        self.track(details_entry(event, details).field(fields::ERROR, format!("{err:#}")));
    }

    fn track(&self, entry: approvals_observability::TrackingEntry) {
        best_effort(self.tracking.as_ref(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approvals_arx::{ApprovalRequestExpression, Approver, Operation};
    use approvals_core::DocumentTypeId;
    use approvals_events::InMemoryBroker;
    use approvals_observability::MemoryTrackingSink;

    use crate::blob_store::InMemoryBlobStore;
    use crate::collaborators::memory::{RecordingEmailClient, StaticRenderer};
    use crate::summary_store::{InMemorySummaryStore, SummaryTenantLogic};

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        blobs: Arc<InMemoryBlobStore>,
        email: Arc<RecordingEmailClient>,
        renderer: Arc<StaticRenderer>,
        tracking: Arc<MemoryTrackingSink>,
        processor: NotificationProcessor,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(InMemoryBroker::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let email = Arc::new(RecordingEmailClient::new());
        let renderer = Arc::new(StaticRenderer::new());
        let tracking = Arc::new(MemoryTrackingSink::new());
        let processor = NotificationProcessor::new(
            Arc::new(PipelineConfig::default()),
            broker.clone(),
            blobs.clone(),
            email.clone(),
            renderer.clone(),
            Arc::new(SummaryTenantLogic::new(InMemorySummaryStore::new())),
            tracking.clone(),
        );
        Fixture {
            broker,
            blobs,
            email,
            renderer,
            tracking,
            processor,
        }
    }

    fn details(actionable: bool) -> (ApprovalNotificationDetails, ApprovalTenantInfo) {
        let id = DocumentTypeId::from_uuid(Uuid::now_v7());
        let mut tenant = ApprovalTenantInfo::new("Purchasing", id);
        tenant.notify_email = true;
        tenant.notify_email_with_approval_functionality = actionable;
        tenant.actionable_notification_template_keys = vec!["PendingApproval".into()];

        let mut arx = ApprovalRequestExpression::new(id, Operation::Create);
        arx.approvers = Some(vec![Approver::with_alias("alice")]);
        let details = ApprovalNotificationDetails::from_expression(arx, tenant.clone(), vec![]);
        (details, tenant)
    }

    #[tokio::test]
    async fn missing_routing_info_returns_false() {
        let f = fixture();
        let (mut details, tenant) = details(false);
        details.device_notification_info = None;

        assert!(!f.processor.send_notifications(&mut details, &tenant).await);
        assert_eq!(f.tracking.count(TrackingEvent::DeviceNotificationInfoMissing), 1);
        assert!(f.email.sent().is_empty());
    }

    #[tokio::test]
    async fn regular_email_when_not_actionable() {
        let f = fixture();
        let (mut details, tenant) = details(false);

        assert!(f.processor.send_notifications(&mut details, &tenant).await);
        let sent = f.email.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].actionable);
        assert_eq!(sent[0].message.to, ["alice"]);
        assert_eq!(sent[0].message.template_key, "PendingApproval");
        assert!(f.broker.published().is_empty());
    }

    #[tokio::test]
    async fn actionable_path_replaces_regular_email() {
        let f = fixture();
        let (mut details, tenant) = details(true);

        assert!(f.processor.send_notifications(&mut details, &tenant).await);
        assert!(f.email.sent().is_empty());

        let queued = f.broker.published_to(approvals_events::topics::ACTIONABLE_EMAIL);
        assert_eq!(queued.len(), 1);
        let container = &PipelineConfig::default().containers.notification;
        let screenshot_id = queued[0].property(properties::SCREENSHOT_BLOB_ID).unwrap();
        assert!(f.blobs.contains(container, screenshot_id));

        let stored = f
            .blobs
            .download_byte_array(container, queued[0].blob_id().unwrap())
            .await
            .unwrap();
        let stored: ApprovalNotificationDetails = serde_json::from_slice(&stored).unwrap();
        assert_eq!(
            stored.device_notification_info.unwrap().notification_template_key,
            "PendingApprovalActionable"
        );
    }

    #[tokio::test]
    async fn render_failure_falls_back_to_regular_email() {
        let f = fixture();
        f.renderer.fail(true);
        let (mut details, tenant) = details(true);

        assert!(f.processor.send_notifications(&mut details, &tenant).await);
        assert_eq!(f.email.sent().len(), 1);
        let reason = details.device_notification_info.unwrap().failure_reason.unwrap();
        assert!(reason.contains("renderer failed"));
        assert_eq!(f.tracking.count(TrackingEvent::ActionableEmailFailed), 1);
    }

    #[tokio::test]
    async fn email_failure_is_recorded_not_raised() {
        let f = fixture();
        f.email.fail_regular(true);
        let (mut details, tenant) = details(false);

        assert!(f.processor.send_notifications(&mut details, &tenant).await);
        assert_eq!(f.tracking.count(TrackingEvent::EmailFailed), 1);
        assert!(details.device_notification_info.unwrap().failure_reason.is_some());
    }

    #[tokio::test]
    async fn failed_actionable_publish_leaves_no_blobs() {
        let f = fixture();
        f.broker.fail_topic(approvals_events::topics::ACTIONABLE_EMAIL);
        let (mut details, tenant) = details(true);

        assert!(f.processor.send_notifications(&mut details, &tenant).await);
        let container = &PipelineConfig::default().containers.notification;
        assert!(f.blobs.blob_ids(container).is_empty());
        assert_eq!(f.tracking.count(TrackingEvent::ActionableEmailFailed), 1);
        assert_eq!(f.email.sent().len(), 1);
    }
}

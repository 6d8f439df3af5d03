//! Integration tests for the message pipeline.
//!
//! Tests: Broker → Receiver → Validator → Tenant logic → Notification topic
//! → Email/Teams, plus the audit agent and the topic workers.
//!
//! Verifies:
//! - Valid expressions are persisted, acknowledged and produce one notification
//! - Invalid expressions are dead-lettered without retries
//! - Transient failures consume the retry budget, then move topics
//! - Lock loss is propagated, never retried
//! - Audit writes are isolated per expression
//! - Notification channels are independent

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use approvals_arx::convert::{CONTRACTS_NAMESPACE, LEGACY_CONTRACTS_NAMESPACE};
    use approvals_arx::{
        ApprovalIdentifier, ApprovalRequestExpression, ApprovalSummaryRow, ApprovalTenantInfo,
        ArxValidator, Approver, Operation, SummaryJson, TeamsNotificationMode, Telemetry,
        ValidationFailure, Validator,
    };
    use approvals_core::DocumentTypeId;
    use approvals_events::{BrokerMessage, InMemoryBroker, MessageBroker};
    use approvals_observability::{MemoryTrackingSink, TrackingEvent, fields};

    use crate::audit_store::InMemoryAuditStore;
    use crate::blob_store::InMemoryBlobStore;
    use crate::collaborators::memory::{
        RecordingEmailClient, StaticFlighting, StaticNameResolver, StaticRenderer,
        StaticTokenProvider,
    };
    use crate::collaborators::{TenantBusinessLogic, UserIdentity};
    use crate::config::PipelineConfig;
    use crate::error::AuditError;
    use crate::host::{PipelineDeps, PipelineHost};
    use crate::notification::MemoryTeamsTransport;
    use crate::receiver::ProcessingOutcome;
    use crate::summary_store::{InMemorySummaryStore, SummaryStore, SummaryTenantLogic};
    use crate::tenant_registry::InMemoryTenantRegistry;
    use crate::workers::{AuditTopicHandler, MessageHandler};

    /// Summary-backed tenant logic that fails a configurable number of times,
    /// or once for a chosen document.
    struct FlakyLogic {
        inner: SummaryTenantLogic<Arc<InMemorySummaryStore>>,
        failures_left: AtomicU32,
        fail_once_for: Mutex<Option<String>>,
        calls: AtomicU32,
    }

    impl FlakyLogic {
        fn fail_next(&self, n: u32) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        fn fail_once_for(&self, document_number: &str) {
            *self.fail_once_for.lock().unwrap() = Some(document_number.to_string());
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TenantBusinessLogic for FlakyLogic {
        async fn process_approval(
            &self,
            arx: &ApprovalRequestExpression,
            tenant: &ApprovalTenantInfo,
        ) -> anyhow::Result<Vec<ApprovalSummaryRow>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut once = self.fail_once_for.lock().unwrap();
                if once.as_deref() == Some(arx.document_number()) {
                    once.take();
                    anyhow::bail!("summary store timed out");
                }
            }
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("summary store throttled the request");
            }
            self.inner.process_approval(arx, tenant).await
        }
    }

    struct Harness {
        config: PipelineConfig,
        doc_type: DocumentTypeId,
        broker: Arc<InMemoryBroker>,
        blobs: Arc<InMemoryBlobStore>,
        summaries: Arc<InMemorySummaryStore>,
        logic: Arc<FlakyLogic>,
        audit: Arc<InMemoryAuditStore>,
        email: Arc<RecordingEmailClient>,
        teams: Arc<MemoryTeamsTransport>,
        tracking: Arc<MemoryTrackingSink>,
        host: PipelineHost,
    }

    fn harness(configure: impl FnOnce(&mut ApprovalTenantInfo)) -> Harness {
        harness_with_teams(configure, MemoryTeamsTransport::default())
    }

    fn harness_with_teams(
        configure: impl FnOnce(&mut ApprovalTenantInfo),
        teams: MemoryTeamsTransport,
    ) -> Harness {
        let config = PipelineConfig {
            number_of_retries: 2,
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            ..PipelineConfig::default()
        };

        let doc_type = DocumentTypeId::from_uuid(Uuid::now_v7());
        let mut tenant = ApprovalTenantInfo::new("Purchasing", doc_type);
        configure(&mut tenant);

        let broker = Arc::new(InMemoryBroker::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let summaries = Arc::new(InMemorySummaryStore::new());
        let logic = Arc::new(FlakyLogic {
            inner: SummaryTenantLogic::new(summaries.clone()),
            failures_left: AtomicU32::new(0),
            fail_once_for: Mutex::new(None),
            calls: AtomicU32::new(0),
        });
        let audit = Arc::new(InMemoryAuditStore::new());
        let email = Arc::new(RecordingEmailClient::new());
        let teams = Arc::new(teams);
        let tracking = Arc::new(MemoryTrackingSink::new());

        let deps = PipelineDeps {
            broker: broker.clone(),
            blobs: blobs.clone(),
            tenants: Arc::new(InMemoryTenantRegistry::new(vec![tenant])),
            logic: logic.clone(),
            audit_store: audit.clone(),
            email: email.clone(),
            renderer: Arc::new(StaticRenderer::new()),
            flighting: Arc::new(StaticFlighting::new(["alice"])),
            names: Arc::new(StaticNameResolver::new([UserIdentity {
                alias: "alice".into(),
                display_name: "Alice Example".into(),
                object_id: "oid-alice".into(),
            }])),
            tokens: Arc::new(StaticTokenProvider::new("teams-token")),
            teams: teams.clone(),
            tracking: tracking.clone(),
        };

        Harness {
            host: PipelineHost::new(config.clone(), deps),
            config,
            doc_type,
            broker,
            blobs,
            summaries,
            logic,
            audit,
            email,
            teams,
            tracking,
        }
    }

    fn create_arx(doc_type: DocumentTypeId, number: &str) -> ApprovalRequestExpression {
        let mut arx = ApprovalRequestExpression::new(doc_type, Operation::Create);
        arx.approval_identifier = Some(ApprovalIdentifier {
            display_document_number: format!("PO-{number}"),
            document_number: number.to_string(),
            fiscal_year: Some("2024".into()),
        });
        arx.approvers = Some(vec![Approver::with_alias("alice"), Approver::with_alias("bob")]);
        arx.summary_data = Some(SummaryJson {
            title: format!("Confidential purchase {number}"),
            unit_value: Some("1200".into()),
            unit_of_measure: Some("USD".into()),
            ..SummaryJson::default()
        });
        arx.telemetry = Some(Telemetry {
            tcv: "tcv-1".into(),
            xcv: format!("xcv-{number}"),
            business_process_name: String::new(),
        });
        arx
    }

    impl Harness {
        /// Store `batch` in `container` and return the message pointing at it.
        fn stage(&self, container: &str, batch: &[ApprovalRequestExpression]) -> BrokerMessage {
            let blob_id = Uuid::now_v7().to_string();
            self.blobs
                .put(container, &blob_id, serde_json::to_vec(batch).unwrap());
            BrokerMessage::for_blob(blob_id)
        }

        fn stage_main(&self, batch: &[ApprovalRequestExpression]) -> BrokerMessage {
            self.stage(&self.config.containers.main, batch)
        }

        async fn receive_main(&self, message: &BrokerMessage) -> ProcessingOutcome {
            self.host
                .main_receiver()
                .on_main_message_received(message.blob_id(), message)
                .await
                .unwrap()
        }

        async fn receive_notifications(&self) -> Vec<ProcessingOutcome> {
            let mut outcomes = Vec::new();
            for message in self.broker.published_to(&self.config.topics.notification) {
                outcomes.push(
                    self.host
                        .notification_receiver()
                        .on_notification_message_received(message.blob_id(), &message)
                        .await
                        .unwrap(),
                );
            }
            outcomes
        }

        fn rows(&self, number: &str) -> Vec<ApprovalSummaryRow> {
            self.summaries.rows_for_document(self.doc_type, number)
        }
    }

    #[tokio::test]
    async fn create_scenario_persists_and_queues_one_notification() {
        let h = harness(|t| t.notify_email = true);
        let arx = create_arx(h.doc_type, "100");
        assert!(ArxValidator::default().validate(&arx).is_empty());

        let message = h.stage_main(&[arx]);
        assert_eq!(h.receive_main(&message).await, ProcessingOutcome::Acknowledged);

        assert_eq!(h.rows("100").len(), 2);
        let queued = h.broker.published_to(&h.config.topics.notification);
        assert_eq!(queued.len(), 1);
        assert!(queued[0].is_notification_details());
        assert!(h.blobs.contains(&h.config.containers.notification, queued[0].blob_id().unwrap()));

        assert!(!h.blobs.contains(&h.config.containers.main, message.blob_id().unwrap()));
        assert_eq!(h.broker.completed().len(), 1);
        assert!(h.broker.dead_lettered().is_empty());
        assert_eq!(h.tracking.count(TrackingEvent::MessageCompleted), 1);
    }

    #[tokio::test]
    async fn empty_approvers_are_dead_lettered_with_one_failure() {
        let h = harness(|t| t.notify_email = true);
        let mut arx = create_arx(h.doc_type, "101");
        arx.approvers = Some(vec![]);

        let message = h.stage_main(&[arx]);
        assert_eq!(h.receive_main(&message).await, ProcessingOutcome::DeadLettered);

        let dead = h.broker.dead_lettered();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "ValidationFailed");
        let failures: Vec<ValidationFailure> = serde_json::from_str(&dead[0].description).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].property, "ApprovalRequestExpression.Approvers");

        assert_eq!(h.logic.calls(), 0);
        assert!(h.broker.published().is_empty());
        assert!(h.blobs.contains(&h.config.containers.main, message.blob_id().unwrap()));
        assert_eq!(h.tracking.count(TrackingEvent::ArxValidationFailed), 1);
    }

    #[tokio::test]
    async fn one_invalid_expression_dead_letters_the_whole_batch() {
        let h = harness(|_| {});
        let good = create_arx(h.doc_type, "102");
        let mut bad = create_arx(h.doc_type, "103");
        bad.approvers = Some(vec![Approver::with_alias("bad/alias")]);

        let message = h.stage_main(&[good, bad]);
        assert_eq!(h.receive_main(&message).await, ProcessingOutcome::DeadLettered);

        let failures: Vec<ValidationFailure> =
            serde_json::from_str(&h.broker.dead_lettered()[0].description).unwrap();
        assert_eq!(failures[0].property, "ApprovalRequestExpression.Approvers[0].Alias");
        assert!(h.rows("102").is_empty());
    }

    #[tokio::test]
    async fn retry_budget_of_two_makes_three_attempts_then_moves_to_retry_topic() {
        let h = harness(|_| {});
        h.logic.fail_next(u32::MAX);

        let message = h.stage_main(&[create_arx(h.doc_type, "200")]);
        assert_eq!(h.receive_main(&message).await, ProcessingOutcome::MovedToRetryTopic);

        assert_eq!(h.logic.calls(), 3);
        assert_eq!(h.tracking.count(TrackingEvent::ProcessingAttemptFailed), 3);

        let forwarded = h.broker.published_to(&h.config.topics.retry);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].retry_count(), 1);
        assert_eq!(forwarded[0].blob_id(), message.blob_id());
        assert!(h.blobs.contains(&h.config.containers.main, message.blob_id().unwrap()));

        // The original is completed on the main topic once forwarded.
        let completed = h.broker.completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, h.config.topics.main);
    }

    #[tokio::test]
    async fn retry_topic_recovers_after_transient_failure() {
        let h = harness(|_| {});
        h.logic.fail_next(u32::MAX);
        let message = h.stage_main(&[create_arx(h.doc_type, "201")]);
        h.receive_main(&message).await;

        h.logic.fail_next(1);
        let forwarded = h.broker.published_to(&h.config.topics.retry).remove(0);
        let outcome = h
            .host
            .main_receiver()
            .on_retry_message_received(forwarded.blob_id(), &forwarded)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessingOutcome::Acknowledged);
        assert_eq!(h.rows("201").len(), 2);
        assert!(!h.blobs.contains(&h.config.containers.main, message.blob_id().unwrap()));
    }

    #[tokio::test]
    async fn exhausted_retry_topic_dead_letters_and_deletes_blob() {
        let h = harness(|_| {});
        h.logic.fail_next(u32::MAX);
        let message = h.stage_main(&[create_arx(h.doc_type, "202")]);

        let outcome = h
            .host
            .main_receiver()
            .on_retry_message_received(message.blob_id(), &message)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessingOutcome::DeadLettered);
        let dead = h.broker.dead_lettered();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "RetriesExhausted");
        assert!(h.broker.published_to(&h.config.topics.retry).is_empty());
        assert!(!h.blobs.contains(&h.config.containers.main, message.blob_id().unwrap()));
        assert_eq!(h.tracking.count(TrackingEvent::DeadLetteredFromRetryTopic), 1);
    }

    #[tokio::test]
    async fn lock_loss_is_propagated_without_retry() {
        let h = harness(|_| {});
        let message = h.stage_main(&[create_arx(h.doc_type, "300")]);
        h.broker.expire_lock(message.message_id());

        let err = h
            .host
            .main_receiver()
            .on_main_message_received(message.blob_id(), &message)
            .await
            .unwrap_err();

        assert!(err.is_lock_lost());
        assert_eq!(h.logic.calls(), 1);
        assert!(h.broker.dead_lettered().is_empty());
        assert!(h.broker.published_to(&h.config.topics.retry).is_empty());
        assert!(h.blobs.contains(&h.config.containers.main, message.blob_id().unwrap()));
        assert_eq!(h.tracking.count(TrackingEvent::MessageLockLost), 1);
    }

    #[tokio::test]
    async fn replaying_a_message_leaves_persistence_unchanged() {
        let h = harness(|_| {});
        let arx = create_arx(h.doc_type, "400");

        let first = h.stage_main(std::slice::from_ref(&arx));
        h.receive_main(&first).await;
        let before = h.rows("400");

        let replay = h.stage_main(&[arx]);
        h.receive_main(&replay).await;

        assert_eq!(h.rows("400"), before);
        assert_eq!(h.summaries.len(), 2);
    }

    #[tokio::test]
    async fn unknown_tenant_is_dead_lettered() {
        let h = harness(|_| {});
        let other = DocumentTypeId::from_uuid(Uuid::now_v7());
        let message = h.stage_main(&[create_arx(other, "500")]);

        assert_eq!(h.receive_main(&message).await, ProcessingOutcome::DeadLettered);
        assert_eq!(h.broker.dead_lettered()[0].reason, "TenantNotFound");
        assert_eq!(h.logic.calls(), 0);
    }

    #[tokio::test]
    async fn legacy_namespace_payload_is_processed() {
        let h = harness(|_| {});
        let mut arx = create_arx(h.doc_type, "600");
        arx.type_marker = Some(format!(
            "{CONTRACTS_NAMESPACE}.DataContracts.ApprovalRequestExpressionExt, {CONTRACTS_NAMESPACE}"
        ));
        let legacy = serde_json::to_string(&arx)
            .unwrap()
            .replace(CONTRACTS_NAMESPACE, LEGACY_CONTRACTS_NAMESPACE);

        let message = BrokerMessage::new(legacy.into_bytes());
        let outcome = h
            .host
            .main_receiver()
            .on_main_message_received(None, &message)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessingOutcome::Acknowledged);
        assert_eq!(h.rows("600").len(), 2);
    }

    #[tokio::test]
    async fn audit_isolates_failed_writes() {
        let h = harness(|_| {});
        let batch = [
            create_arx(h.doc_type, "700"),
            create_arx(h.doc_type, "701"),
            create_arx(h.doc_type, "702"),
        ];
        h.audit.fail_document("701");
        let message = h.stage(&h.config.containers.audit, &batch);

        let report = h
            .host
            .audit_agent()
            .process_message(message.blob_id(), &message)
            .await
            .unwrap();

        assert_eq!(report.succeeded, ["700", "702"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].document_number, "701");

        let records = h.audit.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].arx_json.contains("Confidential purchase"));
        assert!(!h.blobs.contains(&h.config.containers.audit, message.blob_id().unwrap()));

        assert_eq!(h.tracking.count(TrackingEvent::AuditArxLogged), 2);
        assert_eq!(h.tracking.count(TrackingEvent::AuditArxLogFailed), 1);
        assert_eq!(h.tracking.count(TrackingEvent::AuditBlobDeleted), 1);
        assert_eq!(h.tracking.count(TrackingEvent::AuditProcessingCompleted), 1);

        // Cross-reference logging never carries summary data.
        for entry in h.tracking.entries() {
            if entry.event == TrackingEvent::AuditArxLogged {
                let logged = entry.get(fields::ARX).unwrap();
                assert!(logged.contains("700") || logged.contains("702"));
                assert!(!logged.contains("Confidential purchase"));
            }
        }
    }

    #[tokio::test]
    async fn audit_fails_the_batch_for_an_unknown_tenant() {
        let h = harness(|_| {});
        let batch = vec![
            create_arx(h.doc_type, "710"),
            create_arx(DocumentTypeId::from_uuid(Uuid::now_v7()), "711"),
        ];
        let message = BrokerMessage::new(serde_json::to_vec(&batch).unwrap());

        let err = h
            .host
            .audit_agent()
            .process_message(None, &message)
            .await
            .unwrap_err();

        assert!(matches!(err, AuditError::TenantNotFound(_)));
        assert!(h.audit.records().is_empty());
        assert_eq!(h.tracking.count(TrackingEvent::AuditMessageProcessingFailed), 1);
    }

    #[tokio::test]
    async fn email_failure_does_not_stop_teams() {
        let h = harness(|t| {
            t.notify_email = true;
            t.notify_teams = TeamsNotificationMode::EnableForAll;
        });
        h.email.fail_regular(true);

        let message = h.stage_main(&[create_arx(h.doc_type, "800")]);
        h.receive_main(&message).await;
        assert_eq!(h.receive_notifications().await, [ProcessingOutcome::Acknowledged]);

        assert!(h.email.sent().is_empty());
        assert_eq!(h.tracking.count(TrackingEvent::EmailFailed), 1);
        assert_eq!(h.teams.posted().len(), 1);
        assert_eq!(h.tracking.count(TrackingEvent::TeamsSent), 1);
        assert!(h.blobs.blob_ids(&h.config.containers.notification).is_empty());
    }

    #[tokio::test]
    async fn flighted_teams_notifies_only_flighted_approver() {
        let h = harness(|t| t.notify_teams = TeamsNotificationMode::EnableForFlightedUsers);

        let message = h.stage_main(&[create_arx(h.doc_type, "810")]);
        h.receive_main(&message).await;
        h.receive_notifications().await;

        let posted = h.teams.posted();
        assert_eq!(posted.len(), 1);
        let recipients = &posted[0].payload.recipients;
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].alias, "alice");
        assert_eq!(posted[0].bearer_token, "teams-token");
    }

    #[tokio::test]
    async fn actionable_email_flows_through_its_own_topic() {
        let h = harness(|t| {
            t.notify_email = true;
            t.notify_email_with_approval_functionality = true;
            t.actionable_notification_template_keys = vec!["PendingApproval".into()];
        });

        let message = h.stage_main(&[create_arx(h.doc_type, "900")]);
        h.receive_main(&message).await;
        h.receive_notifications().await;
        assert!(h.email.sent().is_empty());

        let queued = h.broker.published_to(&h.config.topics.actionable_email);
        assert_eq!(queued.len(), 1);
        let outcome = h
            .host
            .actionable_receiver()
            .on_actionable_message_received(queued[0].blob_id(), &queued[0])
            .await
            .unwrap();
        assert_eq!(outcome, ProcessingOutcome::Acknowledged);

        let sent = h.email.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].actionable);
        assert_eq!(sent[0].message.template_key, "PendingApprovalActionable");
        assert_eq!(sent[0].screenshot.as_deref(), Some(StaticRenderer::IMAGE));
        assert!(h.blobs.blob_ids(&h.config.containers.notification).is_empty());
    }

    #[tokio::test]
    async fn notification_topic_accepts_raw_expression_batches() {
        let h = harness(|t| t.notify_email = true);
        let message = h.stage(&h.config.containers.notification, &[create_arx(h.doc_type, "910")]);
        assert!(!message.is_notification_details());

        let outcome = h
            .host
            .notification_receiver()
            .on_notification_message_received(message.blob_id(), &message)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessingOutcome::Acknowledged);
        assert_eq!(h.email.sent().len(), 1);
        assert_eq!(h.email.sent()[0].message.to, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn undecodable_notification_is_dead_lettered_and_blob_deleted() {
        let h = harness(|t| t.notify_email = true);
        let blob_id = Uuid::now_v7().to_string();
        h.blobs.put(&h.config.containers.notification, &blob_id, b"not json".to_vec());
        let message = BrokerMessage::for_blob(&blob_id);

        let outcome = h
            .host
            .notification_receiver()
            .on_notification_message_received(message.blob_id(), &message)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessingOutcome::DeadLettered);
        assert!(!h.blobs.contains(&h.config.containers.notification, &blob_id));
        assert_eq!(h.tracking.count(TrackingEvent::NotificationDeadLettered), 1);
    }

    #[tokio::test]
    async fn workers_drive_the_pipeline_end_to_end() {
        let h = harness(|t| t.notify_email = true);
        let running = h.host.start();

        let batch = [create_arx(h.doc_type, "1000")];
        let main = h.stage_main(&batch);
        let audit = h.stage(&h.config.containers.audit, &batch);
        h.broker.publish(&h.config.topics.main, main).await.unwrap();
        h.broker.publish(&h.config.topics.audit, audit).await.unwrap();

        for _ in 0..400 {
            if !h.email.sent().is_empty() && !h.audit.records().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        running.shutdown().await;

        assert_eq!(h.email.sent().len(), 1);
        assert_eq!(h.audit.records().len(), 1);
        assert_eq!(h.rows("1000").len(), 2);
        assert!(h.blobs.blob_ids(&h.config.containers.main).is_empty());
        assert!(h.blobs.blob_ids(&h.config.containers.notification).is_empty());
    }

    #[tokio::test]
    async fn batch_retry_queues_each_notification_once() {
        let h = harness(|t| t.notify_email = true);
        h.logic.fail_once_for("1101");

        let message = h.stage_main(&[create_arx(h.doc_type, "1100"), create_arx(h.doc_type, "1101")]);
        assert_eq!(h.receive_main(&message).await, ProcessingOutcome::Acknowledged);

        assert_eq!(h.logic.calls(), 4);
        assert_eq!(h.broker.published_to(&h.config.topics.notification).len(), 2);
        assert_eq!(h.blobs.blob_ids(&h.config.containers.notification).len(), 2);

        h.receive_notifications().await;
        assert_eq!(h.email.sent().len(), 2);
    }

    #[tokio::test]
    async fn retry_topic_does_not_requeue_notifications() {
        let h = harness(|t| t.notify_email = true);
        h.logic.fail_next(u32::MAX);
        let message = h.stage_main(&[create_arx(h.doc_type, "1110")]);
        assert_eq!(h.receive_main(&message).await, ProcessingOutcome::MovedToRetryTopic);
        assert!(h.broker.published_to(&h.config.topics.notification).is_empty());

        h.logic.fail_next(0);
        let forwarded = h.broker.published_to(&h.config.topics.retry).remove(0);
        h.host
            .main_receiver()
            .on_retry_message_received(forwarded.blob_id(), &forwarded)
            .await
            .unwrap();
        assert_eq!(h.broker.published_to(&h.config.topics.notification).len(), 1);

        // A redelivery of an already stamped message queues nothing new.
        let stamped = forwarded.with_property(approvals_events::properties::QUEUED_NOTIFICATIONS, "0");
        let blob_id = stamped.blob_id().unwrap().to_string();
        h.blobs.put(
            &h.config.containers.main,
            &blob_id,
            serde_json::to_vec(&[create_arx(h.doc_type, "1110")]).unwrap(),
        );
        h.host
            .main_receiver()
            .on_retry_message_received(Some(blob_id.as_str()), &stamped)
            .await
            .unwrap();
        assert_eq!(h.broker.published_to(&h.config.topics.notification).len(), 1);
    }

    #[tokio::test]
    async fn failed_notification_publish_leaves_no_blob() {
        let h = harness(|t| t.notify_email = true);
        h.broker.fail_topic(&h.config.topics.notification);

        let message = h.stage_main(&[create_arx(h.doc_type, "1200")]);
        assert_eq!(h.receive_main(&message).await, ProcessingOutcome::MovedToRetryTopic);

        assert!(h.blobs.blob_ids(&h.config.containers.notification).is_empty());
        assert!(h.blobs.contains(&h.config.containers.main, message.blob_id().unwrap()));
    }

    #[tokio::test]
    async fn teams_failure_does_not_stop_email() {
        let h = harness_with_teams(
            |t| {
                t.notify_email = true;
                t.notify_teams = TeamsNotificationMode::EnableForAll;
            },
            MemoryTeamsTransport::with_status(503),
        );

        let message = h.stage_main(&[create_arx(h.doc_type, "1300")]);
        h.receive_main(&message).await;
        assert_eq!(h.receive_notifications().await, [ProcessingOutcome::Acknowledged]);

        assert_eq!(h.teams.posted().len(), 1);
        assert_eq!(h.tracking.count(TrackingEvent::TeamsFailed), 1);
        assert_eq!(h.email.sent().len(), 1);
        assert_eq!(h.tracking.count(TrackingEvent::EmailSent), 1);
        assert_eq!(h.tracking.count(TrackingEvent::NotificationProcessingCompleted), 1);
    }

    fn audit_handler(h: &Harness) -> AuditTopicHandler {
        AuditTopicHandler {
            agent: h.host.audit_agent().clone(),
            broker: h.broker.clone(),
            topic: h.config.topics.audit.clone(),
        }
    }

    #[tokio::test]
    async fn transient_audit_failure_is_redelivered() {
        let h = harness(|_| {});
        let handler = audit_handler(&h);
        let mut sub = h.broker.subscribe(&h.config.topics.audit);

        let staged = h.stage(&h.config.containers.audit, &[create_arx(h.doc_type, "1400")]);
        h.broker.publish(&h.config.topics.audit, staged).await.unwrap();
        let first = sub.recv().await.unwrap();

        h.blobs.make_unavailable(&h.config.containers.audit);
        handler.handle(first).await.unwrap();
        assert!(h.broker.dead_lettered().is_empty());
        assert_eq!(h.broker.abandoned().len(), 1);
        assert!(h.audit.records().is_empty());

        h.blobs.restore(&h.config.containers.audit);
        let redelivered = sub.try_recv().unwrap();
        assert_eq!(redelivered.delivery_count(), 2);
        handler.handle(redelivered).await.unwrap();

        assert_eq!(h.audit.records().len(), 1);
        assert_eq!(h.broker.completed().len(), 1);
        assert!(h.broker.dead_lettered().is_empty());
    }

    #[tokio::test]
    async fn permanent_audit_failure_is_dead_lettered() {
        let h = harness(|_| {});
        let handler = audit_handler(&h);
        let unknown = DocumentTypeId::from_uuid(Uuid::now_v7());
        let message = BrokerMessage::new(serde_json::to_vec(&[create_arx(unknown, "1410")]).unwrap());

        handler.handle(message).await.unwrap();

        let dead = h.broker.dead_lettered();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "TenantNotFound");
        assert!(h.broker.abandoned().is_empty());
    }
}

//! Audit agent: records every received expression, independent of whether
//! the main pipeline accepts it.
//!
//! Each expression in a batch is written on its own; one failed write never
//! stops its siblings. Batch-level problems (no payload, undecodable
//! payload, unknown tenant) fail the whole message.

use std::sync::Arc;

use approvals_arx::{ApprovalRequestExpression, ArxConverter, RedactedArx};
use approvals_events::BrokerMessage;
use approvals_observability::{PerfScope, TrackingEntry, TrackingEvent, TrackingSink, best_effort, fields};

use crate::audit_store::{AuditRecord, AuditStore};
use crate::blob_store::BlobStore;
use crate::config::PipelineConfig;
use crate::error::AuditError;
use crate::receiver::load_payload;
use crate::tenant_registry::TenantRegistry;

/// An expression whose audit write failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFailure {
    pub document_number: String,
    pub error: String,
}

/// Result of auditing one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditBatchReport {
    /// Document numbers written to the audit store.
    pub succeeded: Vec<String>,
    pub failed: Vec<AuditFailure>,
}

pub struct AuditAgent {
    config: Arc<PipelineConfig>,
    converter: ArxConverter,
    blobs: Arc<dyn BlobStore>,
    tenants: Arc<dyn TenantRegistry>,
    store: Arc<dyn AuditStore>,
    tracking: Arc<dyn TrackingSink>,
}

impl AuditAgent {
    pub fn new(
        config: Arc<PipelineConfig>,
        converter: ArxConverter,
        blobs: Arc<dyn BlobStore>,
        tenants: Arc<dyn TenantRegistry>,
        store: Arc<dyn AuditStore>,
        tracking: Arc<dyn TrackingSink>,
    ) -> Self {
        Self {
            config,
            converter,
            blobs,
            tenants,
            store,
            tracking,
        }
    }

    pub async fn process_message(
        &self,
        blob_id: Option<&str>,
        message: &BrokerMessage,
    ) -> Result<AuditBatchReport, AuditError> {
        let _scope = PerfScope::start("audit_agent", message.message_id());
        let raw = serde_json::to_string(message).unwrap_or_else(|_| message.message_id().to_string());
        self.track(self.entry(TrackingEvent::AuditProcessingStarted, message).field(fields::RAW_MESSAGE, raw));

        match self.audit(blob_id, message).await {
            Ok(report) => Ok(report),
            Err(err) => {
                tracing::error!(message_id = message.message_id(), error = %err, "audit processing failed");
                self.track(
                    self.entry(TrackingEvent::AuditMessageProcessingFailed, message)
                        .field(fields::ERROR, &err),
                );
                Err(err)
            }
        }
    }

    async fn audit(&self, blob_id: Option<&str>, message: &BrokerMessage) -> Result<AuditBatchReport, AuditError> {
        let container = &self.config.containers.audit;
        let payload = load_payload(self.blobs.as_ref(), container, blob_id, message)
            .await?
            .ok_or_else(|| AuditError::MissingPayload {
                message_id: message.message_id().to_string(),
            })?;
        let batch = self.converter.convert(&payload)?;
        self.ensure_tenants(&batch).await?;

        let mut report = AuditBatchReport::default();
        for arx in &batch {
            let document_number = arx.document_number().to_string();
            match self.write(arx, message).await {
                Ok(()) => {
                    self.track(
                        self.arx_entry(TrackingEvent::AuditArxLogged, arx, message)
                            .field(fields::ARX, RedactedArx::from(arx).to_log_string()),
                    );
                    report.succeeded.push(document_number);
                }
                Err(err) => {
                    tracing::warn!(message_id = message.message_id(), document_number = %document_number, error = %err, "audit write failed");
                    self.track(
                        self.arx_entry(TrackingEvent::AuditArxLogFailed, arx, message)
                            .field(fields::ERROR, &err),
                    );
                    report.failed.push(AuditFailure {
                        document_number,
                        error: err.to_string(),
                    });
                }
            }
        }

        if let Some(id) = blob_id {
            self.delete_source_blob(container, id, message).await;
        }

        self.track(
            self.entry(TrackingEvent::AuditProcessingCompleted, message)
                .field(fields::COUNT, report.succeeded.len()),
        );
        Ok(report)
    }

    /// Every expression must belong to a known tenant before anything is
    /// written.
    async fn ensure_tenants(&self, batch: &[ApprovalRequestExpression]) -> Result<(), AuditError> {
        let tenants = self
            .tenants
            .get_tenants(false)
            .await
            .map_err(AuditError::TenantLookup)?;
        for arx in batch {
            let known = arx
                .document_type_id
                .is_some_and(|id| tenants.iter().any(|t| t.owns(&id)));
            if !known {
                let id = arx
                    .document_type_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "<missing>".to_string());
                return Err(AuditError::TenantNotFound(id));
            }
        }
        Ok(())
    }

    async fn write(&self, arx: &ApprovalRequestExpression, message: &BrokerMessage) -> Result<(), AuditError> {
        let record = AuditRecord::new(arx, TrackingEvent::AuditArxLogged.id(), message.message_id())?;
        self.store.write(record).await?;
        Ok(())
    }

    async fn delete_source_blob(&self, container: &str, blob_id: &str, message: &BrokerMessage) {
        let deleted = match self.blobs.does_exist(container, blob_id).await {
            Ok(true) => self.blobs.delete_blob(container, blob_id).await.map(|()| true),
            Ok(false) => Ok(false),
            Err(err) => Err(err),
        };
        match deleted {
            Ok(true) => self.track(
                self.entry(TrackingEvent::AuditBlobDeleted, message)
                    .field(fields::BLOB_ID, blob_id),
            ),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(container, blob_id, error = %err, "failed to delete audit blob");
            }
        }
    }

    fn entry(&self, event: TrackingEvent, message: &BrokerMessage) -> TrackingEntry {
        TrackingEntry::new(event)
            .field(fields::TOPIC, &self.config.topics.audit)
            .field(fields::MESSAGE_ID, message.message_id())
            .field_opt(fields::BLOB_ID, message.blob_id())
    }

    fn arx_entry(&self, event: TrackingEvent, arx: &ApprovalRequestExpression, message: &BrokerMessage) -> TrackingEntry {
        let telemetry = arx.telemetry_or_default();
        self.entry(event, message)
            .field(fields::XCV, telemetry.xcv)
            .field(fields::TCV, telemetry.tcv)
            .field_opt(fields::DOCUMENT_TYPE_ID, arx.document_type_id)
            .field(fields::DOCUMENT_NUMBER, arx.document_number())
            .field(fields::OPERATION, arx.operation)
    }

    fn track(&self, entry: TrackingEntry) {
        best_effort(self.tracking.as_ref(), entry);
    }
}

//! Durable audit log of received expressions.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use approvals_arx::ApprovalRequestExpression;
use approvals_core::DocumentTypeId;

#[derive(Debug, Error)]
pub enum AuditStoreError {
    #[error("audit record could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit store write failed: {0}")]
    WriteFailed(String),
}

/// Immutable record of one expression as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuditRecord {
    pub document_type_id: Option<DocumentTypeId>,
    pub document_number: String,
    pub tracking_event_id: u32,
    pub broker_message_id: String,
    pub logged_at: DateTime<Utc>,
    /// The full expression, serialized.
    pub arx_json: String,
}

impl AuditRecord {
    pub fn new(
        arx: &ApprovalRequestExpression,
        tracking_event_id: u32,
        broker_message_id: impl Into<String>,
    ) -> Result<Self, AuditStoreError> {
        Ok(Self {
            document_type_id: arx.document_type_id,
            document_number: arx.document_number().to_string(),
            tracking_event_id,
            broker_message_id: broker_message_id.into(),
            logged_at: Utc::now(),
            arx_json: serde_json::to_string(arx)?,
        })
    }
}

/// Append-only audit storage.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn write(&self, record: AuditRecord) -> Result<(), AuditStoreError>;
}

/// In-memory audit store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
    failing_documents: RwLock<HashSet<String>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Writes for this document number will fail.
    pub fn fail_document(&self, document_number: &str) {
        if let Ok(mut set) = self.failing_documents.write() {
            set.insert(document_number.to_string());
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn write(&self, record: AuditRecord) -> Result<(), AuditStoreError> {
        let failing = self
            .failing_documents
            .read()
            .map(|set| set.contains(&record.document_number))
            .unwrap_or(false);
        if failing {
            return Err(AuditStoreError::WriteFailed(format!(
                "rejected record for document {}",
                record.document_number
            )));
        }

        self.records
            .write()
            .map_err(|_| AuditStoreError::WriteFailed("lock poisoned".into()))?
            .push(record);
        Ok(())
    }
}

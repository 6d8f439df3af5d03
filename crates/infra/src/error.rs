//! Pipeline error types.
//!
//! A [`PipelineError`] is either permanent (the message can never succeed
//! and is dead-lettered straight away) or retryable (it consumes the retry
//! budget). Lock loss is neither: it is propagated to the broker untouched.

use thiserror::Error;

use approvals_arx::{ConvertError, ValidationFailure};
use approvals_events::BrokerError;

use crate::audit_store::AuditStoreError;
use crate::blob_store::BlobStoreError;
use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("expression failed validation with {} failure(s)", .0.len())]
    Validation(Vec<ValidationFailure>),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ConvertError),

    #[error("message {message_id} carries no payload")]
    MissingPayload { message_id: String },

    #[error("no tenant owns document type {0}")]
    TenantNotFound(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Blob(#[from] BlobStoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("processing failed: {0:#}")]
    Processing(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::Broker(err) if err.is_lock_lost())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidPayload(_)
                | Self::MissingPayload { .. }
                | Self::TenantNotFound(_)
                | Self::Serialization(_)
        )
    }

    /// Dead-letter reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationFailed",
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::MissingPayload { .. } => "MissingPayload",
            Self::TenantNotFound(_) => "TenantNotFound",
            Self::Serialization(_) => "SerializationFailed",
            Self::Blob(_) | Self::Broker(_) | Self::Processing(_) => "ProcessingFailed",
        }
    }

    /// Dead-letter description. Validation failures are attached as JSON.
    pub fn description(&self) -> String {
        match self {
            Self::Validation(failures) => {
                serde_json::to_string(failures).unwrap_or_else(|_| self.to_string())
            }
            other => other.to_string(),
        }
    }
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        !self.is_permanent() && !self.is_lock_lost()
    }
}

/// Batch-level audit failure. Per-expression write failures are not errors
/// at this level; they are reported in the batch report.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("message {message_id} carries no payload")]
    MissingPayload { message_id: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ConvertError),

    #[error("no tenant owns document type {0}")]
    TenantNotFound(String),

    #[error("tenant lookup failed: {0:#}")]
    TenantLookup(anyhow::Error),

    #[error(transparent)]
    Blob(#[from] BlobStoreError),

    #[error(transparent)]
    Store(#[from] AuditStoreError),
}

impl AuditError {
    /// Failures that redelivery cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::MissingPayload { .. } | Self::InvalidPayload(_) | Self::TenantNotFound(_)
        )
    }

    /// Dead-letter reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingPayload { .. } => "MissingPayload",
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::TenantNotFound(_) => "TenantNotFound",
            Self::TenantLookup(_) | Self::Blob(_) | Self::Store(_) => "AuditProcessingFailed",
        }
    }
}

//! Infrastructure layer: configuration, stores, receivers, notification
//! dispatch and the workers that drive them.

pub mod audit_agent;
pub mod audit_store;
pub mod blob_store;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod host;
pub mod notification;
pub mod receiver;
pub mod retry;
pub mod summary_store;
pub mod tenant_registry;
pub mod workers;

pub use audit_agent::{AuditAgent, AuditBatchReport, AuditFailure};
pub use config::{ConfigError, PipelineConfig};
pub use error::{AuditError, PipelineError};
pub use host::{PipelineDeps, PipelineHost, RunningPipeline};
pub use receiver::ProcessingOutcome;
pub use retry::{BackoffStrategy, RetryPolicy};

#[cfg(test)]
mod integration_tests;

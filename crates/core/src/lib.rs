//! `approvals-core`: shared building blocks for the approvals pipeline.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{CorrelationId, DocumentTypeId};

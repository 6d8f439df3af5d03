//! `approvals-arx`: the Approval Request Expression (ARX) domain.
//!
//! - `model`: the wire model tenants submit
//! - `operation`: operation kinds and the per-operation field view
//! - `tenant`: tenant configuration as seen by the pipeline
//! - `notification`: enriched notification payloads and summary rows
//! - `convert`: payload decoding with versioned schema migrations
//! - `validation`: the composable validator chain
//! - `redacted`: PII-free projection used for audit cross-reference logging

pub mod convert;
pub mod datetime;
pub mod model;
pub mod notification;
pub mod operation;
pub mod redacted;
pub mod tenant;
pub mod validation;

pub use convert::{ArxConverter, ConvertError, SchemaMigration, SchemaMigrationRegistry};
pub use model::{
    ActionDetail, ApprovalIdentifier, ApprovalLevel, ApprovalRequestExpression, Approver,
    CustomAttribute, NotificationDetail, ReminderDetail, SummaryJson, Telemetry, User,
};
pub use notification::{ApprovalNotificationDetails, ApprovalSummaryRow, DeviceNotificationInfo};
pub use operation::{Operation, OperationFields};
pub use redacted::RedactedArx;
pub use tenant::{ApprovalTenantInfo, TeamsNotificationMode};
pub use validation::{ArxValidator, ValidationFailure, Validator};

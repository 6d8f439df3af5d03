//! Notification dispatch: email (regular and actionable) and Teams.
//!
//! Channels are independent. A failure on one is recorded on the
//! notification's failure reason and never stops the others.

pub mod processor;
pub mod teams;

pub use processor::NotificationProcessor;
pub use teams::{
    HttpTeamsTransport, MemoryTeamsTransport, PostedTeamsRequest, TeamsNotifier, TeamsPayload,
    TeamsTransport,
};

use approvals_arx::ApprovalNotificationDetails;
use approvals_observability::{TrackingEntry, TrackingEvent, fields};

/// Tracking entry carrying the identifying fields of a notification.
pub(crate) fn details_entry(event: TrackingEvent, details: &ApprovalNotificationDetails) -> TrackingEntry {
    let template_key = details
        .device_notification_info
        .as_ref()
        .map(|i| i.notification_template_key.as_str());

    TrackingEntry::new(event)
        .field(fields::XCV, &details.telemetry.xcv)
        .field(fields::TCV, &details.telemetry.tcv)
        .field(fields::TENANT, &details.tenant.app_name)
        .field(fields::DOCUMENT_NUMBER, details.document_number())
        .field(fields::OPERATION, details.expression.operation)
        .field_opt(fields::TEMPLATE_KEY, template_key)
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use approvals_core::DocumentTypeId;

use crate::model::{
    ActionDetail, ApprovalIdentifier, ApprovalRequestExpression, Approver, NotificationDetail,
    Telemetry,
};
use crate::operation::Operation;

/// Log-safe view of an expression.
///
/// Summary and details data are never part of the projection. The canonical
/// expression is borrowed, not cloned or mutated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedactedArx<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type_id: Option<&'a DocumentTypeId>,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_identifier: Option<&'a ApprovalIdentifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approvers: Option<&'a [Approver]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_for: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_detail: Option<&'a ActionDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_detail: Option<&'a NotificationDetail>,
    pub refresh_details: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<&'a Telemetry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_date_time: Option<DateTime<Utc>>,
}

impl<'a> From<&'a ApprovalRequestExpression> for RedactedArx<'a> {
    fn from(arx: &'a ApprovalRequestExpression) -> Self {
        Self {
            document_type_id: arx.document_type_id.as_ref(),
            operation: arx.operation,
            approval_identifier: arx.approval_identifier.as_ref(),
            approvers: arx.approvers.as_deref(),
            delete_for: arx.delete_for.as_deref(),
            action_detail: arx.action_detail.as_ref(),
            notification_detail: arx.notification_detail.as_ref(),
            refresh_details: arx.refresh_details,
            telemetry: arx.telemetry.as_ref(),
            operation_date_time: arx.operation_date_time,
        }
    }
}

impl RedactedArx<'_> {
    /// Compact JSON for log fields. Falls back to an empty object.
    pub fn to_log_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

//! Notification payloads produced after persistence succeeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use approvals_core::DocumentTypeId;

use crate::model::{ApprovalRequestExpression, Telemetry};
use crate::operation::Operation;
use crate::tenant::ApprovalTenantInfo;

/// A pending-approval row as persisted by tenant business logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalSummaryRow {
    pub approver: String,
    pub document_type_id: DocumentTypeId,
    pub document_number: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_json: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Per-notification routing data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceNotificationInfo {
    pub notification_template_key: String,
    pub approver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl DeviceNotificationInfo {
    /// Append a failure reason without discarding earlier ones.
    pub fn record_failure(&mut self, reason: impl AsRef<str>) {
        let reason = reason.as_ref();
        match &mut self.failure_reason {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(reason);
            }
            None => self.failure_reason = Some(reason.to_string()),
        }
    }
}

/// Enriched ARX consumed by the notification processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalNotificationDetails {
    pub expression: ApprovalRequestExpression,
    pub tenant: ApprovalTenantInfo,
    #[serde(default)]
    pub summary_rows: Vec<ApprovalSummaryRow>,
    #[serde(default)]
    pub device_notification_info: Option<DeviceNotificationInfo>,
    #[serde(default)]
    pub telemetry: Telemetry,
}

impl ApprovalNotificationDetails {
    /// Build notification details for a processed expression.
    ///
    /// The template key comes from the tenant's `NotificationDetail`, falling
    /// back to the operation default. The target is the explicit `To` list, or
    /// the approvers when none was given.
    pub fn from_expression(
        expression: ApprovalRequestExpression,
        tenant: ApprovalTenantInfo,
        summary_rows: Vec<ApprovalSummaryRow>,
    ) -> Self {
        let detail = expression.notification_detail.as_ref();

        let template_key = detail
            .map(|d| d.template_key.trim())
            .filter(|k| !k.is_empty())
            .unwrap_or(expression.operation.default_template_key())
            .to_string();

        let approver = detail
            .map(|d| d.to.trim().to_string())
            .filter(|to| !to.is_empty())
            .unwrap_or_else(|| expression.approver_aliases().join(";"));

        let mut telemetry = expression.telemetry_or_default();
        if telemetry.business_process_name.is_empty() {
            telemetry.business_process_name =
                tenant.business_process_name_for(expression.operation);
        }

        Self {
            expression,
            tenant,
            summary_rows,
            device_notification_info: Some(DeviceNotificationInfo {
                notification_template_key: template_key,
                approver,
                failure_reason: None,
            }),
            telemetry,
        }
    }

    pub fn document_number(&self) -> &str {
        self.expression.document_number()
    }

    /// Whether the tenant asked not to notify at all for this expression.
    pub fn notifications_suppressed(&self) -> bool {
        self.expression
            .notification_detail
            .as_ref()
            .is_some_and(|d| !d.send_notification)
    }
}

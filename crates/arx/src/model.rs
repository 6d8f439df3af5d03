//! Wire model for Approval Request Expressions.
//!
//! Field names follow the PascalCase JSON contract tenants already publish.
//! Required-ness is not enforced by deserialization: missing values decode to
//! `None`/empty and are reported by the validator chain, so a malformed ARX
//! produces a full failure list instead of a single parse error.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use approvals_core::DocumentTypeId;

use crate::operation::{Operation, OperationFields};

fn default_true() -> bool {
    true
}

/// The unit of work submitted by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalRequestExpression {
    /// Type marker carried by older producers; checked after schema migration.
    #[serde(rename = "$type", default, skip_serializing_if = "Option::is_none")]
    pub type_marker: Option<String>,

    #[serde(default)]
    pub document_type_id: Option<DocumentTypeId>,

    pub operation: Operation,

    #[serde(default)]
    pub approval_identifier: Option<ApprovalIdentifier>,

    #[serde(default)]
    pub approvers: Option<Vec<Approver>>,

    #[serde(default)]
    pub delete_for: Option<Vec<String>>,

    #[serde(default)]
    pub action_detail: Option<ActionDetail>,

    #[serde(default)]
    pub notification_detail: Option<NotificationDetail>,

    #[serde(default)]
    pub summary_data: Option<SummaryJson>,

    #[serde(default)]
    pub details_data: Option<BTreeMap<String, String>>,

    #[serde(default = "default_true")]
    pub refresh_details: bool,

    #[serde(default)]
    pub telemetry: Option<Telemetry>,

    #[serde(
        default,
        with = "crate::datetime::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_date_time: Option<DateTime<Utc>>,
}

impl ApprovalRequestExpression {
    /// Minimal expression for the given tenant and operation.
    pub fn new(document_type_id: DocumentTypeId, operation: Operation) -> Self {
        Self {
            type_marker: None,
            document_type_id: Some(document_type_id),
            operation,
            approval_identifier: None,
            approvers: None,
            delete_for: None,
            action_detail: None,
            notification_detail: None,
            summary_data: None,
            details_data: None,
            refresh_details: true,
            telemetry: None,
            operation_date_time: None,
        }
    }

    pub fn operation_fields(&self) -> OperationFields<'_> {
        OperationFields::of(self)
    }

    /// Internal document number, or an empty string when the identifier is absent.
    pub fn document_number(&self) -> &str {
        self.approval_identifier
            .as_ref()
            .map(|id| id.document_number.as_str())
            .unwrap_or_default()
    }

    pub fn display_document_number(&self) -> &str {
        self.approval_identifier
            .as_ref()
            .map(|id| id.display_document_number.as_str())
            .unwrap_or_default()
    }

    pub fn approver_aliases(&self) -> Vec<&str> {
        self.approvers
            .iter()
            .flatten()
            .map(|a| a.alias.as_str())
            .collect()
    }

    /// The party who submitted or acted on the document (best available).
    pub fn sender_alias(&self) -> Option<&str> {
        self.summary_data
            .as_ref()
            .and_then(|s| s.submitter.as_ref())
            .or_else(|| self.action_detail.as_ref().and_then(|a| a.action_by.as_ref()))
            .map(|u| u.alias.as_str())
            .filter(|a| !a.is_empty())
    }

    pub fn telemetry_or_default(&self) -> Telemetry {
        self.telemetry.clone().unwrap_or_default()
    }
}

/// Composite document key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalIdentifier {
    #[serde(default)]
    pub display_document_number: String,
    #[serde(default)]
    pub document_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal_year: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Approver {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_backup: bool,
}

impl Approver {
    pub fn with_alias(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Self::default()
        }
    }
}

/// An identity reference (submitter, actor, hierarchy member).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub name: String,
}

/// Who did what, and when.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionDetail {
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        with = "crate::datetime::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action_by: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationDetail {
    #[serde(default = "default_true")]
    pub send_notification: bool,
    #[serde(default)]
    pub template_key: String,
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    #[serde(default)]
    pub reminder: Option<ReminderDetail>,
}

impl Default for NotificationDetail {
    fn default() -> Self {
        Self {
            send_notification: true,
            template_key: String::new(),
            to: String::new(),
            cc: None,
            bcc: None,
            reminder: None,
        }
    }
}

/// Reminder schedule: explicit dates, or a frequency bounded by an expiration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReminderDetail {
    #[serde(
        default,
        with = "crate::datetime::option_vec",
        skip_serializing_if = "Option::is_none"
    )]
    pub reminder_dates: Option<Vec<DateTime<Utc>>>,
    /// Days between reminders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u32>,
    #[serde(
        default,
        with = "crate::datetime::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_template: Option<String>,
}

/// Summary document rendered in approver inboxes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryJson {
    /// Textual on purpose: compared case-insensitively with the ARX tenant id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measure: Option<String>,
    #[serde(
        default,
        with = "crate::datetime::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub submitted_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_identifier: Option<ApprovalIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_attribute: Option<CustomAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_hierarchy: Option<Vec<ApprovalLevel>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomAttribute {
    #[serde(default)]
    pub custom_attribute_name: String,
    #[serde(default)]
    pub custom_attribute_value: String,
}

/// One level of the approval chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalLevel {
    #[serde(default)]
    pub approvers: Option<Vec<User>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_type: Option<String>,
}

/// Correlation identifiers propagated through every hop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(rename = "Tcv", default)]
    pub tcv: String,
    #[serde(rename = "Xcv", default)]
    pub xcv: String,
    #[serde(rename = "BusinessProcessName", default)]
    pub business_process_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_details_defaults_to_true() {
        let arx: ApprovalRequestExpression =
            serde_json::from_str(r#"{"Operation":"Create"}"#).unwrap();
        assert!(arx.refresh_details);
        assert!(arx.document_type_id.is_none());
    }

    #[test]
    fn operation_date_time_is_normalized_to_utc() {
        let arx: ApprovalRequestExpression = serde_json::from_str(
            r#"{"Operation":"Update","OperationDateTime":"2024-05-01T12:00:00-04:00"}"#,
        )
        .unwrap();
        assert_eq!(
            arx.operation_date_time.unwrap().to_rfc3339(),
            "2024-05-01T16:00:00+00:00"
        );
    }

    #[test]
    fn sender_prefers_submitter_over_actor() {
        let mut arx = ApprovalRequestExpression::new(
            DocumentTypeId::from_uuid(uuid::Uuid::now_v7()),
            Operation::Update,
        );
        arx.action_detail = Some(ActionDetail {
            action_by: Some(User {
                alias: "actor".into(),
                name: String::new(),
            }),
            ..ActionDetail::default()
        });
        assert_eq!(arx.sender_alias(), Some("actor"));

        arx.summary_data = Some(SummaryJson {
            submitter: Some(User {
                alias: "submitter".into(),
                name: String::new(),
            }),
            ..SummaryJson::default()
        });
        assert_eq!(arx.sender_alias(), Some("submitter"));
    }
}

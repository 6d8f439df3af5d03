use serde::{Deserialize, Serialize};

use approvals_core::DocumentTypeId;

use crate::operation::Operation;

/// Teams enablement for a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamsNotificationMode {
    #[default]
    DisableForAll,
    EnableForFlightedUsers,
    EnableForAll,
}

/// Tenant configuration as seen by the pipeline (owned by the tenant registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalTenantInfo {
    pub app_name: String,
    pub doc_type_id: String,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_email_with_approval_functionality: bool,
    #[serde(default)]
    pub notify_teams: TeamsNotificationMode,
    /// Format string; `{0}` is the app name and `{1}` the operation.
    #[serde(default)]
    pub business_process_name: String,
    #[serde(default)]
    pub actionable_notification_template_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_image: Option<String>,
}

impl ApprovalTenantInfo {
    pub fn new(app_name: impl Into<String>, doc_type_id: DocumentTypeId) -> Self {
        Self {
            app_name: app_name.into(),
            doc_type_id: doc_type_id.to_string(),
            notify_email: false,
            notify_email_with_approval_functionality: false,
            notify_teams: TeamsNotificationMode::DisableForAll,
            business_process_name: String::new(),
            actionable_notification_template_keys: Vec::new(),
            tenant_image: None,
        }
    }

    pub fn owns(&self, document_type_id: &DocumentTypeId) -> bool {
        document_type_id.matches_str(&self.doc_type_id)
    }

    /// Exact (case-sensitive) match against the configured actionable keys.
    pub fn is_actionable_template(&self, template_key: &str) -> bool {
        self.actionable_notification_template_keys
            .iter()
            .any(|k| k == template_key)
    }

    pub fn supports_actionable_email(&self, template_key: &str) -> bool {
        self.notify_email
            && self.notify_email_with_approval_functionality
            && self.is_actionable_template(template_key)
    }

    pub fn has_notification_channel(&self) -> bool {
        self.notify_email || self.notify_teams != TeamsNotificationMode::DisableForAll
    }

    /// Business process name for telemetry, or an empty string when unconfigured.
    pub fn business_process_name_for(&self, operation: Operation) -> String {
        self.business_process_name
            .replace("{0}", &self.app_name)
            .replace("{1}", operation.as_str())
    }
}

//! External collaborators the pipeline calls out to.
//!
//! Failures from these are opaque (`anyhow::Error`): the pipeline only
//! decides whether to retry, record or degrade, never how to recover.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use approvals_arx::{
    ApprovalNotificationDetails, ApprovalRequestExpression, ApprovalSummaryRow,
    ApprovalTenantInfo,
};

/// Tenant-specific persistence and notification policy.
#[async_trait]
pub trait TenantBusinessLogic: Send + Sync {
    /// Persist the expression. Must be idempotent on
    /// `(document type, document number, operation)`.
    async fn process_approval(
        &self,
        arx: &ApprovalRequestExpression,
        tenant: &ApprovalTenantInfo,
    ) -> anyhow::Result<Vec<ApprovalSummaryRow>>;

    /// Whether this document may carry action buttons.
    async fn should_send_actionable_email(
        &self,
        _details: &ApprovalNotificationDetails,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Whether a plain email should go out, given whether the actionable one did.
    async fn should_send_regular_email(
        &self,
        _details: &ApprovalNotificationDetails,
        actionable_sent: bool,
    ) -> anyhow::Result<bool> {
        Ok(!actionable_sent)
    }
}

/// An outbound email, addressed and keyed to a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub template_key: String,
    pub app_name: String,
    pub document_number: String,
    pub display_document_number: String,
    pub xcv: String,
}

pub(crate) fn split_recipients(list: &str) -> Vec<String> {
    list.split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl EmailMessage {
    pub fn from_details(details: &ApprovalNotificationDetails, template_key: &str) -> Self {
        let detail = details.expression.notification_detail.as_ref();
        let to = details
            .device_notification_info
            .as_ref()
            .map(|i| split_recipients(&i.approver))
            .unwrap_or_default();

        Self {
            to,
            cc: detail
                .and_then(|d| d.cc.as_deref())
                .map(split_recipients)
                .unwrap_or_default(),
            bcc: detail
                .and_then(|d| d.bcc.as_deref())
                .map(split_recipients)
                .unwrap_or_default(),
            template_key: template_key.to_string(),
            app_name: details.tenant.app_name.clone(),
            document_number: details.document_number().to_string(),
            display_document_number: details.expression.display_document_number().to_string(),
            xcv: details.telemetry.xcv.clone(),
        }
    }
}

#[async_trait]
pub trait EmailClient: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> anyhow::Result<()>;

    async fn send_actionable_email(
        &self,
        message: &EmailMessage,
        screenshot: &[u8],
    ) -> anyhow::Result<()>;
}

/// Renders the preview image embedded in actionable emails.
#[async_trait]
pub trait ActionableRenderer: Send + Sync {
    async fn render_screenshot(
        &self,
        details: &ApprovalNotificationDetails,
        template_key: &str,
    ) -> anyhow::Result<Vec<u8>>;
}

#[async_trait]
pub trait FlightingClient: Send + Sync {
    async fn is_feature_enabled_for_user(&self, alias: &str, feature_id: u32) -> anyhow::Result<bool>;
}

/// Directory identity of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub alias: String,
    pub display_name: String,
    pub object_id: String,
}

#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn get_user(&self, alias: &str) -> anyhow::Result<UserIdentity>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire_token(&self, resource: &str) -> anyhow::Result<String>;
}

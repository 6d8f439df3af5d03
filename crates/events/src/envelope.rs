use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Names of the user properties the pipeline reads and writes.
pub mod properties {
    /// Identifier of the blob holding the payload.
    pub const BLOB_ID: &str = "BlobId";
    /// Payload schema/content version. Major version 2 and above means the
    /// body is empty and the payload lives in the blob store.
    pub const CONTENT_VERSION: &str = "ContentVersion";
    /// `"true"` when a notification-topic payload is a serialized
    /// `ApprovalNotificationDetails` rather than a raw expression batch.
    pub const NOTIFICATION_DETAILS: &str = "ApprovalNotificationDetails";
    /// How many times the message went through the retry topic.
    pub const RETRY_COUNT: &str = "RetryCount";
    /// Identifier of the persisted actionable-email screenshot.
    pub const SCREENSHOT_BLOB_ID: &str = "ScreenshotBlobId";
    /// Comma-separated batch indices whose notification was already queued.
    pub const QUEUED_NOTIFICATIONS: &str = "QueuedNotifications";
}

/// Content version written by producers that offload payloads to blobs.
pub const BLOB_CONTENT_VERSION: &str = "2.0";

/// Default topic names.
pub mod topics {
    pub const MAIN: &str = "approvals-main";
    pub const RETRY: &str = "approvals-retry";
    pub const NOTIFICATION: &str = "approvals-notification";
    pub const AUDIT: &str = "approvals-audit";
    pub const ACTIONABLE_EMAIL: &str = "approvals-actionable-email";
}

/// A message as delivered by the broker.
///
/// Notes:
/// - `message_id` is stable across redeliveries.
/// - `delivery_count` starts at 1 and is bumped by the broker on redelivery.
/// - `body` is ignored when the content version says the payload lives in a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    message_id: String,
    #[serde(default)]
    body: Vec<u8>,
    #[serde(default)]
    user_properties: BTreeMap<String, String>,
    delivery_count: u32,
    enqueued_at: DateTime<Utc>,
}

impl BrokerMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: Uuid::now_v7().to_string(),
            body: body.into(),
            user_properties: BTreeMap::new(),
            delivery_count: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// An empty-bodied message that points at a stored blob.
    pub fn for_blob(blob_id: impl Into<String>) -> Self {
        Self::new(Vec::new())
            .with_property(properties::BLOB_ID, blob_id)
            .with_property(properties::CONTENT_VERSION, BLOB_CONTENT_VERSION)
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn user_properties(&self) -> &BTreeMap<String, String> {
        &self.user_properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.user_properties.get(key).map(String::as_str)
    }

    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Copy of this message as the broker would hand it out on redelivery.
    pub fn redelivered(&self) -> Self {
        Self {
            delivery_count: self.delivery_count.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn blob_id(&self) -> Option<&str> {
        self.property(properties::BLOB_ID).filter(|id| !id.trim().is_empty())
    }

    /// Major component of the content version, if present and numeric.
    pub fn content_major_version(&self) -> Option<u32> {
        self.property(properties::CONTENT_VERSION)?
            .trim()
            .split('.')
            .next()?
            .parse()
            .ok()
    }

    /// Whether the payload must be fetched from the blob store.
    pub fn requires_blob(&self) -> bool {
        self.content_major_version().is_some_and(|major| major >= 2)
    }

    pub fn is_notification_details(&self) -> bool {
        self.property(properties::NOTIFICATION_DETAILS)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    pub fn retry_count(&self) -> u32 {
        self.property(properties::RETRY_COUNT)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

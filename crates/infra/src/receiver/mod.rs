//! Topic receivers: receive, process, then acknowledge, retry or dead-letter.
//!
//! Every receiver settles each message exactly once. Lock loss is the only
//! error a receiver returns; everything else ends in a [`ProcessingOutcome`].

pub mod actionable;
pub mod main_topic;
pub mod notification_topic;

pub use actionable::ActionableEmailReceiver;
pub use main_topic::MainTopicReceiver;
pub use notification_topic::NotificationTopicReceiver;

use std::collections::BTreeSet;
use std::sync::Mutex;

use approvals_events::{BrokerMessage, properties};
use approvals_observability::{TrackingEntry, TrackingEvent, fields};

use crate::blob_store::{BlobStore, BlobStoreError};
use crate::error::PipelineError;

/// How a received message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Acknowledged,
    MovedToRetryTopic,
    DeadLettered,
}

/// Batch entries whose notification is already on the notification topic.
///
/// Shared by every attempt on a message and carried onto the retry topic, so
/// an entry is never queued twice for the same submission.
#[derive(Debug, Default)]
pub(crate) struct QueuedNotifications(Mutex<BTreeSet<usize>>);

impl QueuedNotifications {
    pub(crate) fn from_message(message: &BrokerMessage) -> Self {
        let queued = message
            .property(properties::QUEUED_NOTIFICATIONS)
            .map(|v| v.split(',').filter_map(|i| i.trim().parse().ok()).collect())
            .unwrap_or_default();
        Self(Mutex::new(queued))
    }

    pub(crate) fn contains(&self, index: usize) -> bool {
        self.0.lock().map(|q| q.contains(&index)).unwrap_or(false)
    }

    pub(crate) fn insert(&self, index: usize) {
        if let Ok(mut q) = self.0.lock() {
            q.insert(index);
        }
    }

    /// Stamp the queued indices onto a forwarded message.
    pub(crate) fn stamp(&self, message: BrokerMessage) -> BrokerMessage {
        let joined = self
            .0
            .lock()
            .map(|q| q.iter().map(usize::to_string).collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        if joined.is_empty() {
            return message;
        }
        message.with_property(properties::QUEUED_NOTIFICATIONS, joined)
    }
}

/// Fetch the payload for `message`: from `container` when a blob id is
/// known, else the inline body. Blob-offloaded messages without a blob id
/// have no payload.
pub(crate) async fn load_payload(
    blobs: &dyn BlobStore,
    container: &str,
    blob_id: Option<&str>,
    message: &BrokerMessage,
) -> Result<Option<Vec<u8>>, BlobStoreError> {
    if let Some(id) = blob_id.filter(|id| !id.trim().is_empty()) {
        return blobs.download_byte_array(container, id).await.map(Some);
    }
    if message.requires_blob() || message.body().is_empty() {
        return Ok(None);
    }
    Ok(Some(message.body().to_vec()))
}

pub(crate) async fn require_payload(
    blobs: &dyn BlobStore,
    container: &str,
    blob_id: Option<&str>,
    message: &BrokerMessage,
) -> Result<Vec<u8>, PipelineError> {
    load_payload(blobs, container, blob_id, message)
        .await?
        .ok_or_else(|| PipelineError::MissingPayload {
            message_id: message.message_id().to_string(),
        })
}

/// Delete a blob once its message is settled. A failure here leaves an
/// orphan blob but must not change the message outcome.
pub(crate) async fn discard_blob(blobs: &dyn BlobStore, container: &str, blob_id: Option<&str>) {
    let Some(id) = blob_id else {
        return;
    };
    if let Err(err) = blobs.delete_blob(container, id).await {
        tracing::warn!(container, blob_id = id, error = %err, "failed to delete payload blob");
    }
}

/// Copy of `message` for the retry topic with its retry count bumped.
pub(crate) fn forward_for_retry(message: &BrokerMessage) -> BrokerMessage {
    let next = message.retry_count().saturating_add(1);
    message
        .user_properties()
        .iter()
        .fold(BrokerMessage::new(message.body().to_vec()), |fwd, (k, v)| {
            fwd.with_property(k.as_str(), v.as_str())
        })
        .with_property(properties::RETRY_COUNT, next.to_string())
}

pub(crate) fn message_entry(event: TrackingEvent, topic: &str, message: &BrokerMessage) -> TrackingEntry {
    TrackingEntry::new(event)
        .field(fields::TOPIC, topic)
        .field(fields::MESSAGE_ID, message.message_id())
        .field(fields::DELIVERY_COUNT, message.delivery_count())
        .field_opt(fields::BLOB_ID, message.blob_id())
}

//! Checkpoint tracking.
//!
//! Every pipeline checkpoint emits a [`TrackingEntry`]: a numeric event id plus
//! a map of named fields. Recording is best-effort; a failing sink is logged
//! and never fails the processing step that emitted the entry.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field names shared by every component.
pub mod fields {
    pub const XCV: &str = "Xcv";
    pub const TCV: &str = "Tcv";
    pub const MESSAGE_ID: &str = "MessageId";
    pub const BLOB_ID: &str = "BlobId";
    pub const TOPIC: &str = "Topic";
    pub const DOCUMENT_TYPE_ID: &str = "DocumentTypeId";
    pub const DOCUMENT_NUMBER: &str = "DocumentNumber";
    pub const OPERATION: &str = "Operation";
    pub const TENANT: &str = "Tenant";
    pub const APPROVER: &str = "Approver";
    pub const TEMPLATE_KEY: &str = "TemplateKey";
    pub const ATTEMPT: &str = "Attempt";
    pub const DELIVERY_COUNT: &str = "DeliveryCount";
    pub const ERROR: &str = "Error";
    pub const REASON: &str = "Reason";
    pub const COUNT: &str = "Count";
    pub const RAW_MESSAGE: &str = "RawMessage";
    pub const ARX: &str = "Arx";
}

/// Tracking event ids, grouped by component:
/// 1xxx audit agent, 2xxx main/retry receiver, 3xxx notification dispatch,
/// 4xxx Teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingEvent {
    AuditProcessingStarted,
    AuditArxLogged,
    AuditArxLogFailed,
    AuditBlobDeleted,
    AuditProcessingCompleted,
    AuditMessageProcessingFailed,

    MainMessageReceived,
    ArxValidationFailed,
    ArxProcessed,
    NotificationDetailsQueued,
    MessageCompleted,
    ProcessingAttemptFailed,
    MovedToRetryTopic,
    DeadLetteredFromRetryTopic,
    MessageLockLost,
    InvalidPayloadDeadLettered,
    TenantNotFound,

    NotificationMessageReceived,
    DeviceNotificationInfoMissing,
    ActionableEmailQueued,
    EmailSent,
    EmailFailed,
    NotificationProcessingCompleted,
    NotificationDeadLettered,
    ActionableEmailSent,
    ActionableEmailFailed,

    TeamsSkipped,
    TeamsSent,
    TeamsFailed,
    NameResolutionFailed,
}

impl TrackingEvent {
    pub fn id(&self) -> u32 {
        match self {
            TrackingEvent::AuditProcessingStarted => 1001,
            TrackingEvent::AuditArxLogged => 1002,
            TrackingEvent::AuditArxLogFailed => 1003,
            TrackingEvent::AuditBlobDeleted => 1004,
            TrackingEvent::AuditProcessingCompleted => 1005,
            TrackingEvent::AuditMessageProcessingFailed => 1006,

            TrackingEvent::MainMessageReceived => 2001,
            TrackingEvent::ArxValidationFailed => 2002,
            TrackingEvent::ArxProcessed => 2003,
            TrackingEvent::NotificationDetailsQueued => 2004,
            TrackingEvent::MessageCompleted => 2005,
            TrackingEvent::ProcessingAttemptFailed => 2006,
            TrackingEvent::MovedToRetryTopic => 2007,
            TrackingEvent::DeadLetteredFromRetryTopic => 2008,
            TrackingEvent::MessageLockLost => 2009,
            TrackingEvent::InvalidPayloadDeadLettered => 2010,
            TrackingEvent::TenantNotFound => 2011,

            TrackingEvent::NotificationMessageReceived => 3001,
            TrackingEvent::DeviceNotificationInfoMissing => 3002,
            TrackingEvent::ActionableEmailQueued => 3003,
            TrackingEvent::EmailSent => 3004,
            TrackingEvent::EmailFailed => 3005,
            TrackingEvent::NotificationProcessingCompleted => 3006,
            TrackingEvent::NotificationDeadLettered => 3007,
            TrackingEvent::ActionableEmailSent => 3008,
            TrackingEvent::ActionableEmailFailed => 3009,

            TrackingEvent::TeamsSkipped => 4001,
            TrackingEvent::TeamsSent => 4002,
            TrackingEvent::TeamsFailed => 4003,
            TrackingEvent::NameResolutionFailed => 4004,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TrackingEvent::AuditArxLogFailed
                | TrackingEvent::AuditMessageProcessingFailed
                | TrackingEvent::ArxValidationFailed
                | TrackingEvent::ProcessingAttemptFailed
                | TrackingEvent::DeadLetteredFromRetryTopic
                | TrackingEvent::MessageLockLost
                | TrackingEvent::InvalidPayloadDeadLettered
                | TrackingEvent::TenantNotFound
                | TrackingEvent::DeviceNotificationInfoMissing
                | TrackingEvent::EmailFailed
                | TrackingEvent::NotificationDeadLettered
                | TrackingEvent::ActionableEmailFailed
                | TrackingEvent::TeamsFailed
                | TrackingEvent::NameResolutionFailed
        )
    }
}

/// One checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub event: TrackingEvent,
    pub fields: BTreeMap<String, String>,
    pub logged_at: DateTime<Utc>,
}

impl TrackingEntry {
    pub fn new(event: TrackingEvent) -> Self {
        Self {
            event,
            fields: BTreeMap::new(),
            logged_at: Utc::now(),
        }
    }

    pub fn field(mut self, name: &str, value: impl ToString) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    /// Add a field only when a value is present.
    pub fn field_opt(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for checkpoint entries.
pub trait TrackingSink: Send + Sync {
    fn record(&self, entry: TrackingEntry) -> Result<(), TrackingError>;
}

/// Record `entry`, logging (never propagating) sink failures.
pub fn best_effort(sink: &dyn TrackingSink, entry: TrackingEntry) {
    let id = entry.event.id();
    if let Err(err) = sink.record(entry) {
        tracing::warn!(tracking_event_id = id, error = %err, "failed to record tracking event");
    }
}

/// Writes entries as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TrackingSink for TracingSink {
    fn record(&self, entry: TrackingEntry) -> Result<(), TrackingError> {
        let fields = serde_json::to_string(&entry.fields)
            .map_err(|e| TrackingError::Unavailable(e.to_string()))?;
        let id = entry.event.id();

        if entry.event.is_failure() {
            tracing::warn!(
                target: "tracking",
                tracking_event_id = id,
                tracking_event = ?entry.event,
                fields = %fields,
                logged_at = %entry.logged_at,
                "checkpoint"
            );
        } else {
            tracing::info!(
                target: "tracking",
                tracking_event_id = id,
                tracking_event = ?entry.event,
                fields = %fields,
                logged_at = %entry.logged_at,
                "checkpoint"
            );
        }
        Ok(())
    }
}

/// Captures entries in memory for tests.
#[derive(Debug, Default)]
pub struct MemoryTrackingSink {
    entries: RwLock<Vec<TrackingEntry>>,
}

impl MemoryTrackingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TrackingEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<TrackingEvent> {
        self.entries().into_iter().map(|e| e.event).collect()
    }

    pub fn count(&self, event: TrackingEvent) -> usize {
        self.entries().iter().filter(|e| e.event == event).count()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

impl TrackingSink for MemoryTrackingSink {
    fn record(&self, entry: TrackingEntry) -> Result<(), TrackingError> {
        self.entries
            .write()
            .map_err(|_| TrackingError::Unavailable("memory sink lock poisoned".into()))?
            .push(entry);
        Ok(())
    }
}

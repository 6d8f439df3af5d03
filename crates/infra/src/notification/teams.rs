//! Teams notifications.
//!
//! The notifier never fails: every error degrades to `false` (no send) or,
//! for name resolution, to the raw alias.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use approvals_arx::{ApprovalNotificationDetails, Operation, TeamsNotificationMode};
use approvals_core::CorrelationId;
use approvals_observability::{TrackingEntry, TrackingEvent, TrackingSink, best_effort, fields};

use crate::collaborators::{FlightingClient, NameResolver, TokenProvider, UserIdentity};
use crate::config::PipelineConfig;

use super::details_entry;

pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Body posted to the Teams notification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsPayload {
    pub correlation_id: String,
    pub sender: UserIdentity,
    pub recipients: Vec<UserIdentity>,
    /// Template key of the notification.
    pub event: String,
    /// Tenant app name.
    pub provider: String,
    pub role: String,
    pub detail_uri: String,
    pub template_uri: String,
}

/// Delivers a payload; returns the HTTP status code.
#[async_trait]
pub trait TeamsTransport: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        bearer_token: &str,
        request_id: &str,
        payload: &TeamsPayload,
    ) -> anyhow::Result<u16>;
}

#[derive(Debug, Clone)]
pub struct HttpTeamsTransport {
    client: Client,
}

impl HttpTeamsTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TeamsTransport for HttpTeamsTransport {
    async fn post(
        &self,
        endpoint: &str,
        bearer_token: &str,
        request_id: &str,
        payload: &TeamsPayload,
    ) -> anyhow::Result<u16> {
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(bearer_token)
            .header(CLIENT_REQUEST_ID_HEADER, request_id)
            .json(payload)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

/// A request captured by [`MemoryTeamsTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedTeamsRequest {
    pub endpoint: String,
    pub bearer_token: String,
    pub request_id: String,
    pub payload: TeamsPayload,
}

/// Records requests and answers with a fixed status (tests/dev).
#[derive(Debug)]
pub struct MemoryTeamsTransport {
    status: u16,
    posted: RwLock<Vec<PostedTeamsRequest>>,
}

impl Default for MemoryTeamsTransport {
    fn default() -> Self {
        Self::with_status(200)
    }
}

impl MemoryTeamsTransport {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            posted: RwLock::new(Vec::new()),
        }
    }

    pub fn posted(&self) -> Vec<PostedTeamsRequest> {
        self.posted.read().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TeamsTransport for MemoryTeamsTransport {
    async fn post(
        &self,
        endpoint: &str,
        bearer_token: &str,
        request_id: &str,
        payload: &TeamsPayload,
    ) -> anyhow::Result<u16> {
        self.posted
            .write()
            .map_err(|_| anyhow::anyhow!("teams recorder lock poisoned"))?
            .push(PostedTeamsRequest {
                endpoint: endpoint.to_string(),
                bearer_token: bearer_token.to_string(),
                request_id: request_id.to_string(),
                payload: payload.clone(),
            });
        Ok(self.status)
    }
}

pub struct TeamsNotifier {
    config: Arc<PipelineConfig>,
    flighting: Arc<dyn FlightingClient>,
    names: Arc<dyn NameResolver>,
    tokens: Arc<dyn TokenProvider>,
    transport: Arc<dyn TeamsTransport>,
    tracking: Arc<dyn TrackingSink>,
}

impl TeamsNotifier {
    pub fn new(
        config: Arc<PipelineConfig>,
        flighting: Arc<dyn FlightingClient>,
        names: Arc<dyn NameResolver>,
        tokens: Arc<dyn TokenProvider>,
        transport: Arc<dyn TeamsTransport>,
        tracking: Arc<dyn TrackingSink>,
    ) -> Self {
        Self {
            config,
            flighting,
            names,
            tokens,
            transport,
            tracking,
        }
    }

    /// Post a Teams notification for `details`. `true` only when the
    /// endpoint accepted the request.
    pub async fn send_teams_notifications(&self, details: &ApprovalNotificationDetails) -> bool {
        let mode = details.tenant.notify_teams;
        if mode == TeamsNotificationMode::DisableForAll {
            return self.skip(details, "teams disabled for tenant");
        }
        if details.expression.operation == Operation::Delete {
            return self.skip(details, "deletes never notify teams");
        }

        let aliases = self.target_aliases(details);
        let aliases = match mode {
            TeamsNotificationMode::EnableForFlightedUsers => self.flighted(aliases).await,
            _ => aliases,
        };
        if aliases.is_empty() {
            return self.skip(details, "no eligible recipients");
        }

        let mut recipients = Vec::with_capacity(aliases.len());
        for alias in &aliases {
            recipients.push(self.resolve(details, alias).await);
        }
        let sender = match details.expression.sender_alias() {
            Some(alias) => self.resolve(details, alias).await,
            None => fallback_identity(&details.tenant.app_name),
        };

        let payload = self.payload(details, sender, recipients);
        let token = match self.tokens.acquire_token(&self.config.teams.resource).await {
            Ok(token) => token,
            Err(err) => return self.failed(details, &format!("token acquisition failed: {err:#}")),
        };

        match self
            .transport
            .post(&self.config.teams.endpoint, &token, &payload.correlation_id, &payload)
            .await
        {
            Ok(status) if (200..300).contains(&status) => {
                self.track(
                    details_entry(TrackingEvent::TeamsSent, details)
                        .field(fields::COUNT, payload.recipients.len()),
                );
                true
            }
            Ok(status) => self.failed(details, &format!("teams endpoint returned status {status}")),
            Err(err) => self.failed(details, &format!("teams request failed: {err:#}")),
        }
    }

    fn target_aliases(&self, details: &ApprovalNotificationDetails) -> Vec<String> {
        let from_info = details
            .device_notification_info
            .as_ref()
            .map(|i| crate::collaborators::split_recipients(&i.approver))
            .unwrap_or_default();
        if !from_info.is_empty() {
            return from_info;
        }
        details
            .expression
            .approver_aliases()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Keep only approvers in the flight. A failed lookup excludes that
    /// approver alone.
    async fn flighted(&self, aliases: Vec<String>) -> Vec<String> {
        let feature_id = self.config.teams.flighting_feature_id;
        let mut enabled = Vec::with_capacity(aliases.len());
        for alias in aliases {
            match self.flighting.is_feature_enabled_for_user(&alias, feature_id).await {
                Ok(true) => enabled.push(alias),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(alias = %alias, feature_id, error = %format!("{err:#}"), "flighting lookup failed");
                }
            }
        }
        enabled
    }

    async fn resolve(&self, details: &ApprovalNotificationDetails, alias: &str) -> UserIdentity {
        match self.names.get_user(alias).await {
            Ok(user) => user,
            Err(err) => {
                self.track(
                    details_entry(TrackingEvent::NameResolutionFailed, details)
                        .field(fields::APPROVER, alias)
                        .field(fields::ERROR, format!("{err:#}")),
                );
                fallback_identity(alias)
            }
        }
    }

    fn payload(
        &self,
        details: &ApprovalNotificationDetails,
        sender: UserIdentity,
        recipients: Vec<UserIdentity>,
    ) -> TeamsPayload {
        let base = self.config.api_base_url.trim_end_matches('/');
        let doc_type = details
            .expression
            .document_type_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| details.tenant.doc_type_id.clone());
        let event = details
            .device_notification_info
            .as_ref()
            .map(|i| i.notification_template_key.clone())
            .unwrap_or_else(|| details.expression.operation.default_template_key().to_string());

        TeamsPayload {
            correlation_id: CorrelationId::new().to_string(),
            sender,
            recipients,
            detail_uri: format!("{base}/api/v1/detail/{doc_type}/{}", details.document_number()),
            template_uri: format!("{base}/api/v1/template/{doc_type}/{event}"),
            event,
            provider: details.tenant.app_name.clone(),
            role: "Approver".to_string(),
        }
    }

    fn skip(&self, details: &ApprovalNotificationDetails, reason: &str) -> bool {
        tracing::debug!(document_number = details.document_number(), reason, "teams notification skipped");
        self.track(details_entry(TrackingEvent::TeamsSkipped, details).field(fields::REASON, reason));
        false
    }

    fn failed(&self, details: &ApprovalNotificationDetails, error: &str) -> bool {
        tracing::warn!(document_number = details.document_number(), error, "teams notification failed");
        self.track(details_entry(TrackingEvent::TeamsFailed, details).field(fields::ERROR, error));
        false
    }

    fn track(&self, entry: TrackingEntry) {
        best_effort(self.tracking.as_ref(), entry);
    }
}

fn fallback_identity(alias: &str) -> UserIdentity {
    UserIdentity {
        alias: alias.to_string(),
        display_name: alias.to_string(),
        object_id: alias.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approvals_arx::{ApprovalRequestExpression, ApprovalTenantInfo, Approver};
    use approvals_core::DocumentTypeId;
    use approvals_observability::MemoryTrackingSink;
    use uuid::Uuid;

    use crate::collaborators::memory::{StaticFlighting, StaticNameResolver, StaticTokenProvider};

    struct Fixture {
        transport: Arc<MemoryTeamsTransport>,
        tracking: Arc<MemoryTrackingSink>,
        notifier: TeamsNotifier,
    }

    fn fixture(flighting: StaticFlighting, tokens: StaticTokenProvider, status: u16) -> Fixture {
        let transport = Arc::new(MemoryTeamsTransport::with_status(status));
        let tracking = Arc::new(MemoryTrackingSink::new());
        let names = StaticNameResolver::new([UserIdentity {
            alias: "alice".into(),
            display_name: "Alice Example".into(),
            object_id: "oid-alice".into(),
        }]);
        let notifier = TeamsNotifier::new(
            Arc::new(PipelineConfig::default()),
            Arc::new(flighting),
            Arc::new(names),
            Arc::new(tokens),
            transport.clone(),
            tracking.clone(),
        );
        Fixture {
            transport,
            tracking,
            notifier,
        }
    }

    fn details(mode: TeamsNotificationMode, operation: Operation) -> ApprovalNotificationDetails {
        let id = DocumentTypeId::from_uuid(Uuid::now_v7());
        let mut tenant = ApprovalTenantInfo::new("Travel", id);
        tenant.notify_teams = mode;
        let mut arx = ApprovalRequestExpression::new(id, operation);
        arx.approvers = Some(vec![Approver::with_alias("alice"), Approver::with_alias("bob")]);
        ApprovalNotificationDetails::from_expression(arx, tenant, vec![])
    }

    #[tokio::test]
    async fn flighted_mode_sends_only_to_flighted_approvers() {
        let f = fixture(StaticFlighting::new(["alice"]), StaticTokenProvider::new("t"), 200);
        let details = details(TeamsNotificationMode::EnableForFlightedUsers, Operation::Create);

        assert!(f.notifier.send_teams_notifications(&details).await);
        let posted = f.transport.posted();
        assert_eq!(posted.len(), 1);
        let request = &posted[0];
        assert_eq!(request.payload.recipients.len(), 1);
        assert_eq!(request.payload.recipients[0].object_id, "oid-alice");
        assert_eq!(request.bearer_token, "t");
        assert_eq!(request.request_id, request.payload.correlation_id);
        assert!(request.payload.detail_uri.contains("/api/v1/detail/"));
    }

    #[tokio::test]
    async fn unresolvable_names_degrade_to_alias() {
        let f = fixture(StaticFlighting::default(), StaticTokenProvider::new("t"), 200);
        let details = details(TeamsNotificationMode::EnableForAll, Operation::Update);

        assert!(f.notifier.send_teams_notifications(&details).await);
        let payload = &f.transport.posted()[0].payload;
        assert_eq!(payload.recipients[1].object_id, "bob");
        assert_eq!(f.tracking.count(TrackingEvent::NameResolutionFailed), 1);
    }

    #[tokio::test]
    async fn disabled_and_deletes_are_skipped() {
        let f = fixture(StaticFlighting::default(), StaticTokenProvider::new("t"), 200);
        assert!(!f
            .notifier
            .send_teams_notifications(&details(TeamsNotificationMode::DisableForAll, Operation::Create))
            .await);
        assert!(!f
            .notifier
            .send_teams_notifications(&details(TeamsNotificationMode::EnableForAll, Operation::Delete))
            .await);
        assert!(f.transport.posted().is_empty());
        assert_eq!(f.tracking.count(TrackingEvent::TeamsSkipped), 2);
    }

    #[tokio::test]
    async fn flight_lookup_failure_excludes_only_that_approver() {
        let flighting = StaticFlighting::new(["alice", "bob"]).with_failure("bob");
        let f = fixture(flighting, StaticTokenProvider::new("t"), 200);
        let details = details(TeamsNotificationMode::EnableForFlightedUsers, Operation::Create);

        assert!(f.notifier.send_teams_notifications(&details).await);
        assert_eq!(f.transport.posted()[0].payload.recipients.len(), 1);
    }

    #[tokio::test]
    async fn failures_return_false() {
        let details = details(TeamsNotificationMode::EnableForAll, Operation::Create);

        let f = fixture(StaticFlighting::default(), StaticTokenProvider::new("t"), 503);
        assert!(!f.notifier.send_teams_notifications(&details).await);
        assert_eq!(f.tracking.count(TrackingEvent::TeamsFailed), 1);

        let f = fixture(StaticFlighting::default(), StaticTokenProvider::failing(), 200);
        assert!(!f.notifier.send_teams_notifications(&details).await);
        assert!(f.transport.posted().is_empty());
    }
}

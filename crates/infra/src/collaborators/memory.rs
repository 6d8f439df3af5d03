//! In-memory collaborators for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use approvals_arx::ApprovalNotificationDetails;

use super::{
    ActionableRenderer, EmailClient, EmailMessage, FlightingClient, NameResolver, TokenProvider,
    UserIdentity,
};

/// An email captured by [`RecordingEmailClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub message: EmailMessage,
    pub actionable: bool,
    pub screenshot: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct RecordingEmailClient {
    sent: RwLock<Vec<SentEmail>>,
    fail_regular: AtomicBool,
    fail_actionable: AtomicBool,
}

impl RecordingEmailClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn fail_regular(&self, fail: bool) {
        self.fail_regular.store(fail, Ordering::SeqCst);
    }

    pub fn fail_actionable(&self, fail: bool) {
        self.fail_actionable.store(fail, Ordering::SeqCst);
    }

    fn push(&self, email: SentEmail) -> anyhow::Result<()> {
        self.sent
            .write()
            .map_err(|_| anyhow::anyhow!("email recorder lock poisoned"))?
            .push(email);
        Ok(())
    }
}

#[async_trait]
impl EmailClient for RecordingEmailClient {
    async fn send_email(&self, message: &EmailMessage) -> anyhow::Result<()> {
        if self.fail_regular.load(Ordering::SeqCst) {
            anyhow::bail!("smtp relay rejected message");
        }
        self.push(SentEmail {
            message: message.clone(),
            actionable: false,
            screenshot: None,
        })
    }

    async fn send_actionable_email(
        &self,
        message: &EmailMessage,
        screenshot: &[u8],
    ) -> anyhow::Result<()> {
        if self.fail_actionable.load(Ordering::SeqCst) {
            anyhow::bail!("actionable email provider rejected message");
        }
        self.push(SentEmail {
            message: message.clone(),
            actionable: true,
            screenshot: Some(screenshot.to_vec()),
        })
    }
}

/// Returns a fixed image, or fails when asked to.
#[derive(Debug, Default)]
pub struct StaticRenderer {
    fail: AtomicBool,
}

impl StaticRenderer {
    pub const IMAGE: &'static [u8] = b"\x89PNG-preview";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ActionableRenderer for StaticRenderer {
    async fn render_screenshot(
        &self,
        _details: &ApprovalNotificationDetails,
        template_key: &str,
    ) -> anyhow::Result<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("renderer failed for template {template_key}");
        }
        Ok(Self::IMAGE.to_vec())
    }
}

/// Flighting with a fixed set of enabled aliases (case-insensitive).
#[derive(Debug, Default)]
pub struct StaticFlighting {
    enabled: HashSet<String>,
    failing: HashSet<String>,
}

impl StaticFlighting {
    pub fn new<I, S>(enabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            enabled: enabled.into_iter().map(|a| a.as_ref().to_lowercase()).collect(),
            failing: HashSet::new(),
        }
    }

    /// Lookups for this alias will fail.
    pub fn with_failure(mut self, alias: &str) -> Self {
        self.failing.insert(alias.to_lowercase());
        self
    }
}

#[async_trait]
impl FlightingClient for StaticFlighting {
    async fn is_feature_enabled_for_user(&self, alias: &str, feature_id: u32) -> anyhow::Result<bool> {
        let alias = alias.to_lowercase();
        if self.failing.contains(&alias) {
            anyhow::bail!("flighting lookup failed for {alias} (feature {feature_id})");
        }
        Ok(self.enabled.contains(&alias))
    }
}

/// Name resolution from a fixed directory; unknown aliases fail.
#[derive(Debug, Default)]
pub struct StaticNameResolver {
    users: HashMap<String, UserIdentity>,
}

impl StaticNameResolver {
    pub fn new(users: impl IntoIterator<Item = UserIdentity>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.alias.to_lowercase(), u))
                .collect(),
        }
    }
}

#[async_trait]
impl NameResolver for StaticNameResolver {
    async fn get_user(&self, alias: &str) -> anyhow::Result<UserIdentity> {
        self.users
            .get(&alias.to_lowercase())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("user {alias} not found in directory"))
    }
}

#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// A provider whose token acquisition always fails.
    pub fn failing() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire_token(&self, resource: &str) -> anyhow::Result<String> {
        self.token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no token available for {resource}"))
    }
}

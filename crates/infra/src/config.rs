//! Pipeline configuration.
//!
//! `Default` gives development values; [`PipelineConfig::from_env`] overrides
//! any field from `APPROVALS_*` environment variables.

use std::time::Duration;

use thiserror::Error;

use approvals_events::topics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not valid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Blob containers, one per payload kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Containers {
    pub main: String,
    pub notification: String,
    pub audit: String,
}

/// Topic names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub main: String,
    pub retry: String,
    pub notification: String,
    pub audit: String,
    pub actionable_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamsConfig {
    pub endpoint: String,
    /// Resource the bearer token is requested for.
    pub resource: String,
    pub flighting_feature_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub topics: Topics,
    pub containers: Containers,
    /// Retries after the first attempt before a message leaves its topic.
    pub number_of_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub teams: TeamsConfig,
    /// Base URL of this system's detail/template API, used in deep links.
    pub api_base_url: String,
    /// Appended to a template key when the actionable email path is taken.
    pub actionable_template_suffix: String,
    pub max_concurrent_messages: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topics: Topics {
                main: topics::MAIN.to_string(),
                retry: topics::RETRY.to_string(),
                notification: topics::NOTIFICATION.to_string(),
                audit: topics::AUDIT.to_string(),
                actionable_email: topics::ACTIONABLE_EMAIL.to_string(),
            },
            containers: Containers {
                main: "approvals-main".to_string(),
                notification: "approvals-notification".to_string(),
                audit: "approvals-audit".to_string(),
            },
            number_of_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            teams: TeamsConfig {
                endpoint: "http://localhost:7071/api/teams/notify".to_string(),
                resource: "api://approvals-teams".to_string(),
                flighting_feature_id: 0,
            },
            api_base_url: "http://localhost:8080".to_string(),
            actionable_template_suffix: "Actionable".to_string(),
            max_concurrent_messages: 16,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, test maps, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let text = |key: &str, target: &mut String| {
            if let Some(v) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = v.trim().to_string();
            }
        };

        text("APPROVALS_MAIN_TOPIC", &mut cfg.topics.main);
        text("APPROVALS_RETRY_TOPIC", &mut cfg.topics.retry);
        text("APPROVALS_NOTIFICATION_TOPIC", &mut cfg.topics.notification);
        text("APPROVALS_AUDIT_TOPIC", &mut cfg.topics.audit);
        text("APPROVALS_ACTIONABLE_EMAIL_TOPIC", &mut cfg.topics.actionable_email);
        text("APPROVALS_MAIN_CONTAINER", &mut cfg.containers.main);
        text("APPROVALS_NOTIFICATION_CONTAINER", &mut cfg.containers.notification);
        text("APPROVALS_AUDIT_CONTAINER", &mut cfg.containers.audit);
        text("APPROVALS_TEAMS_ENDPOINT", &mut cfg.teams.endpoint);
        text("APPROVALS_TEAMS_RESOURCE", &mut cfg.teams.resource);
        text("APPROVALS_API_BASE_URL", &mut cfg.api_base_url);
        text("APPROVALS_ACTIONABLE_SUFFIX", &mut cfg.actionable_template_suffix);

        if let Some(n) = parse::<u32, _>(&lookup, "APPROVALS_NUMBER_OF_RETRIES")? {
            cfg.number_of_retries = n;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "APPROVALS_RETRY_BASE_DELAY_MS")? {
            cfg.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "APPROVALS_RETRY_MAX_DELAY_MS")? {
            cfg.retry_max_delay = Duration::from_millis(ms);
        }
        if let Some(id) = parse::<u32, _>(&lookup, "APPROVALS_TEAMS_FLIGHTING_FEATURE_ID")? {
            cfg.teams.flighting_feature_id = id;
        }
        if let Some(n) = parse::<usize, _>(&lookup, "APPROVALS_MAX_CONCURRENT_MESSAGES")? {
            if n == 0 {
                return Err(ConfigError::Invalid {
                    key: "APPROVALS_MAX_CONCURRENT_MESSAGES",
                    value: n.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            cfg.max_concurrent_messages = n;
        }

        tracing::debug!(
            main_topic = %cfg.topics.main,
            number_of_retries = cfg.number_of_retries,
            max_concurrent = cfg.max_concurrent_messages,
            "pipeline configuration loaded"
        );

        Ok(cfg)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

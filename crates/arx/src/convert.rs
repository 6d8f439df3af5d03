//! Payload decoding with versioned schema migrations.
//!
//! Long-lived in-flight messages may have been produced by older deployments
//! that referenced the legacy contracts namespace. Before decoding, the raw
//! payload runs through a `SchemaMigrationRegistry`: every migration whose
//! marker occurs in the payload is applied, in registration order. New schema
//! changes are added as new registry entries.

use thiserror::Error;

use crate::model::ApprovalRequestExpression;
use crate::notification::ApprovalNotificationDetails;

/// Namespace used by producers before the contracts were split out.
pub const LEGACY_CONTRACTS_NAMESPACE: &str = "Approvals.Contracts.Legacy";

/// Current contracts namespace; type markers must live under it.
pub const CONTRACTS_NAMESPACE: &str = "Approvals.Contracts";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("payload is empty")]
    Empty,

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not a valid expression: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported type marker: {0}")]
    UnsupportedType(String),
}

/// A single textual schema migration.
#[derive(Debug, Clone, Copy)]
pub struct SchemaMigration {
    pub name: &'static str,
    /// The migration only runs when this marker occurs in the payload.
    pub marker: &'static str,
    pub transform: fn(&str) -> String,
}

impl SchemaMigration {
    pub fn applies_to(&self, payload: &str) -> bool {
        payload.contains(self.marker)
    }
}

fn rewrite_legacy_namespace(payload: &str) -> String {
    payload.replace(LEGACY_CONTRACTS_NAMESPACE, CONTRACTS_NAMESPACE)
}

/// Ordered set of migrations applied before decoding.
#[derive(Debug, Clone)]
pub struct SchemaMigrationRegistry {
    migrations: Vec<SchemaMigration>,
}

impl SchemaMigrationRegistry {
    pub fn empty() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    pub fn register(mut self, migration: SchemaMigration) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn migrations(&self) -> &[SchemaMigration] {
        &self.migrations
    }

    /// Apply every applicable migration. Payloads already in the current
    /// schema come back unchanged.
    pub fn migrate(&self, payload: &str) -> String {
        self.migrations
            .iter()
            .fold(payload.to_string(), |acc, m| {
                if m.applies_to(&acc) { (m.transform)(&acc) } else { acc }
            })
    }
}

impl Default for SchemaMigrationRegistry {
    fn default() -> Self {
        Self::empty().register(SchemaMigration {
            name: "legacy-contracts-namespace",
            marker: LEGACY_CONTRACTS_NAMESPACE,
            transform: rewrite_legacy_namespace,
        })
    }
}

/// Decodes wire payloads into expressions or notification details.
#[derive(Debug, Clone, Default)]
pub struct ArxConverter {
    registry: SchemaMigrationRegistry,
}

impl ArxConverter {
    pub fn new(registry: SchemaMigrationRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SchemaMigrationRegistry {
        &self.registry
    }

    /// Decode a payload holding either a single expression or a batch.
    pub fn convert(&self, payload: &[u8]) -> Result<Vec<ApprovalRequestExpression>, ConvertError> {
        let text = self.prepare(payload)?;

        let expressions = if text.trim_start().starts_with('[') {
            serde_json::from_str::<Vec<ApprovalRequestExpression>>(&text)?
        } else {
            vec![serde_json::from_str::<ApprovalRequestExpression>(&text)?]
        };

        for arx in &expressions {
            check_type_marker(arx.type_marker.as_deref())?;
        }

        Ok(expressions)
    }

    pub fn convert_details(
        &self,
        payload: &[u8],
    ) -> Result<ApprovalNotificationDetails, ConvertError> {
        let text = self.prepare(payload)?;
        let details: ApprovalNotificationDetails = serde_json::from_str(&text)?;
        check_type_marker(details.expression.type_marker.as_deref())?;
        Ok(details)
    }

    fn prepare(&self, payload: &[u8]) -> Result<String, ConvertError> {
        let payload = payload.strip_prefix(UTF8_BOM).unwrap_or(payload);
        let text = std::str::from_utf8(payload)?;
        if text.trim().is_empty() {
            return Err(ConvertError::Empty);
        }
        Ok(self.registry.migrate(text))
    }
}

fn check_type_marker(marker: Option<&str>) -> Result<(), ConvertError> {
    match marker {
        Some(m) if !m.starts_with(CONTRACTS_NAMESPACE) || m.contains(LEGACY_CONTRACTS_NAMESPACE) => {
            Err(ConvertError::UnsupportedType(m.to_string()))
        }
        _ => Ok(()),
    }
}

//! Composable validators for expressions and their nested entities.
//!
//! Every validator returns the full list of failures it found; an empty list
//! means the entity is valid. Nested validators report paths relative to
//! their own entity and the caller prefixes them, so a failure deep in the
//! tree surfaces as e.g. `ApprovalRequestExpression.Approvers[0].Alias`.

mod action;
mod approver;
mod identifier;
mod notification;
mod root;
mod summary;

use core::fmt;

use serde::{Deserialize, Serialize};

pub use action::ActionDetailValidator;
pub use approver::{ApproverValidator, FORBIDDEN_ALIAS_CHARS, UserValidator, validate_alias};
pub use identifier::IdentifierValidator;
pub use notification::{NotificationDetailValidator, ReminderValidator};
pub use root::{ArxValidator, ROOT};
pub use summary::SummaryValidator;

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidationFailure {
    pub message: String,
    /// Dotted path of the offending property.
    pub property: String,
}

impl ValidationFailure {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            property: property.into(),
        }
    }

    pub fn required(property: impl Into<String>) -> Self {
        let property = property.into();
        let message = format!("{} is required", leaf(&property));
        Self { message, property }
    }

    /// Re-root this failure under `prefix`.
    pub fn under(mut self, prefix: &str) -> Self {
        self.property = if self.property.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}.{}", self.property)
        };
        self
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.message)
    }
}

fn leaf(property: &str) -> &str {
    property.rsplit('.').next().unwrap_or(property)
}

/// Validates one kind of entity.
pub trait Validator<T: ?Sized>: Send + Sync {
    fn validate(&self, entity: &T) -> Vec<ValidationFailure>;
}

/// Run `validator` and prefix every failure with `prefix`.
pub(crate) fn nested<T: ?Sized>(
    validator: &dyn Validator<T>,
    entity: &T,
    prefix: &str,
) -> Vec<ValidationFailure> {
    validator
        .validate(entity)
        .into_iter()
        .map(|f| f.under(prefix))
        .collect()
}

pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

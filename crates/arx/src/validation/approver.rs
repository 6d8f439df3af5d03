use crate::model::{Approver, User};

use super::{ValidationFailure, Validator, is_blank};

/// Characters that are never allowed in an alias.
pub const FORBIDDEN_ALIAS_CHARS: [char; 5] = ['^', '/', '\\', '#', '?'];

/// Check a single alias. Offending aliases are rejected as a whole.
pub fn validate_alias(alias: &str, property: &str) -> Option<ValidationFailure> {
    if is_blank(alias) {
        return Some(ValidationFailure::required(property));
    }
    alias
        .chars()
        .find(|c| FORBIDDEN_ALIAS_CHARS.contains(c))
        .map(|c| {
            ValidationFailure::new(
                property,
                format!("Alias '{alias}' contains forbidden character '{c}'"),
            )
        })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ApproverValidator;

impl Validator<Approver> for ApproverValidator {
    fn validate(&self, approver: &Approver) -> Vec<ValidationFailure> {
        validate_alias(&approver.alias, "Alias").into_iter().collect()
    }
}

/// Submitters, actors and hierarchy members.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserValidator;

impl Validator<User> for UserValidator {
    fn validate(&self, user: &User) -> Vec<ValidationFailure> {
        validate_alias(&user.alias, "Alias").into_iter().collect()
    }
}

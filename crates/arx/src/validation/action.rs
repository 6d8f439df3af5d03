use crate::model::ActionDetail;

use super::{UserValidator, ValidationFailure, Validator, is_blank, nested};

#[derive(Debug, Default, Clone, Copy)]
pub struct ActionDetailValidator;

impl Validator<ActionDetail> for ActionDetailValidator {
    fn validate(&self, action: &ActionDetail) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        if is_blank(&action.name) {
            failures.push(ValidationFailure::required("Name"));
        }
        match &action.action_by {
            Some(user) => failures.extend(nested(&UserValidator, user, "ActionBy")),
            None => failures.push(ValidationFailure::required("ActionBy")),
        }
        failures
    }
}

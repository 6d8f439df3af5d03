use crate::model::{ApprovalIdentifier, SummaryJson, User};

use super::{
    IdentifierValidator, UserValidator, ValidationFailure, Validator, is_blank, nested,
};

const HIERARCHY_APPROVERS: &str = "ApprovalHierarchy.Approvers";

pub struct SummaryValidator {
    identifier: Box<dyn Validator<ApprovalIdentifier>>,
    user: Box<dyn Validator<User>>,
}

impl SummaryValidator {
    pub fn new(
        identifier: Box<dyn Validator<ApprovalIdentifier>>,
        user: Box<dyn Validator<User>>,
    ) -> Self {
        Self { identifier, user }
    }
}

impl Default for SummaryValidator {
    fn default() -> Self {
        Self::new(Box::new(IdentifierValidator), Box::new(UserValidator))
    }
}

impl Validator<SummaryJson> for SummaryValidator {
    fn validate(&self, summary: &SummaryJson) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();

        if is_blank(&summary.title) {
            failures.push(ValidationFailure::required("Title"));
        }
        if let Some(id) = &summary.approval_identifier {
            failures.extend(nested(self.identifier.as_ref(), id, "ApprovalIdentifier"));
        }
        if let Some(submitter) = &summary.submitter {
            failures.extend(nested(self.user.as_ref(), submitter, "Submitter"));
        }

        for (level, entry) in summary.approval_hierarchy.iter().flatten().enumerate() {
            match entry.approvers.as_deref() {
                Some(users) if !users.is_empty() => {
                    for user in users {
                        failures.extend(nested(self.user.as_ref(), user, HIERARCHY_APPROVERS));
                    }
                }
                _ => failures.push(ValidationFailure::new(
                    HIERARCHY_APPROVERS,
                    format!("Approval level {} has no approvers", level + 1),
                )),
            }
        }

        failures
    }
}

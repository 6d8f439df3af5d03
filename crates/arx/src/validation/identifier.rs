use crate::model::ApprovalIdentifier;

use super::{ValidationFailure, Validator, is_blank};

/// Both the display and the internal document number are required.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentifierValidator;

impl Validator<ApprovalIdentifier> for IdentifierValidator {
    fn validate(&self, id: &ApprovalIdentifier) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        if is_blank(&id.display_document_number) {
            failures.push(ValidationFailure::required("DisplayDocumentNumber"));
        }
        if is_blank(&id.document_number) {
            failures.push(ValidationFailure::required("DocumentNumber"));
        }
        failures
    }
}

use crate::model::{
    ActionDetail, ApprovalIdentifier, ApprovalRequestExpression, Approver, NotificationDetail,
    SummaryJson,
};
use crate::operation::OperationFields;

use super::{
    ActionDetailValidator, ApproverValidator, IdentifierValidator, NotificationDetailValidator,
    SummaryValidator, ValidationFailure, Validator, nested,
};

/// Path prefix for every failure reported by [`ArxValidator`].
pub const ROOT: &str = "ApprovalRequestExpression";

/// Root validator for an expression.
///
/// Each nested entity is checked by a replaceable sub-validator; the default
/// catalog is installed by `Default`.
pub struct ArxValidator {
    identifier: Box<dyn Validator<ApprovalIdentifier>>,
    approver: Box<dyn Validator<Approver>>,
    action: Box<dyn Validator<ActionDetail>>,
    notification: Box<dyn Validator<NotificationDetail>>,
    summary: Box<dyn Validator<SummaryJson>>,
}

impl Default for ArxValidator {
    fn default() -> Self {
        Self {
            identifier: Box::new(IdentifierValidator),
            approver: Box::new(ApproverValidator),
            action: Box::new(ActionDetailValidator),
            notification: Box::new(NotificationDetailValidator::default()),
            summary: Box::new(SummaryValidator::default()),
        }
    }
}

impl ArxValidator {
    pub fn with_identifier_validator(mut self, v: impl Validator<ApprovalIdentifier> + 'static) -> Self {
        self.identifier = Box::new(v);
        self
    }

    pub fn with_approver_validator(mut self, v: impl Validator<Approver> + 'static) -> Self {
        self.approver = Box::new(v);
        self
    }

    pub fn with_action_validator(mut self, v: impl Validator<ActionDetail> + 'static) -> Self {
        self.action = Box::new(v);
        self
    }

    pub fn with_notification_validator(
        mut self,
        v: impl Validator<NotificationDetail> + 'static,
    ) -> Self {
        self.notification = Box::new(v);
        self
    }

    pub fn with_summary_validator(mut self, v: impl Validator<SummaryJson> + 'static) -> Self {
        self.summary = Box::new(v);
        self
    }

    /// Validate an expression that may be absent.
    pub fn validate_optional(
        &self,
        arx: Option<&ApprovalRequestExpression>,
    ) -> Vec<ValidationFailure> {
        match arx {
            Some(arx) => self.validate(arx),
            None => vec![ValidationFailure::new(ROOT, format!("{ROOT} is required"))],
        }
    }

    fn validate_operation(&self, fields: OperationFields<'_>) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        match fields {
            OperationFields::Create {
                approvers,
                summary,
                action_detail,
            } => {
                require_approvers(approvers, &mut failures);
                require(summary.is_some(), "SummaryJson", &mut failures);
                if action_detail.is_some() {
                    failures.push(ValidationFailure::new(
                        "ActionDetail",
                        "ActionDetail must not be provided for Create",
                    ));
                }
            }
            OperationFields::Update {
                approvers,
                summary,
                delete_for,
                action_detail,
            } => {
                require_delete_for(delete_for, &mut failures);
                require(action_detail.is_some(), "ActionDetail", &mut failures);
                require_approvers(approvers, &mut failures);
                require(summary.is_some(), "SummaryJson", &mut failures);
            }
            OperationFields::Delete {
                delete_for,
                action_detail,
            } => {
                require_delete_for(delete_for, &mut failures);
                require(action_detail.is_some(), "ActionDetail", &mut failures);
            }
            OperationFields::TargetedAction | OperationFields::Complete => {}
        }
        failures
    }

    fn validate_children(&self, arx: &ApprovalRequestExpression) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();

        if let Some(id) = &arx.approval_identifier {
            failures.extend(nested(self.identifier.as_ref(), id, "ApprovalIdentifier"));
        }
        for (i, approver) in arx.approvers.iter().flatten().enumerate() {
            failures.extend(nested(
                self.approver.as_ref(),
                approver,
                &format!("Approvers[{i}]"),
            ));
        }
        if let Some(action) = &arx.action_detail {
            failures.extend(nested(self.action.as_ref(), action, "ActionDetail"));
        }
        if let Some(detail) = &arx.notification_detail {
            failures.extend(nested(self.notification.as_ref(), detail, "NotificationDetail"));
        }
        if let Some(summary) = &arx.summary_data {
            if let (Some(ours), Some(theirs)) = (&arx.document_type_id, &summary.document_type_id) {
                if !ours.matches_str(theirs) {
                    failures.push(ValidationFailure::new(
                        "SummaryJson.DocumentTypeId",
                        format!("SummaryJson.DocumentTypeId '{theirs}' does not match DocumentTypeId '{ours}'"),
                    ));
                }
            }
            failures.extend(nested(self.summary.as_ref(), summary, "SummaryJson"));
        }

        failures
    }
}

impl Validator<ApprovalRequestExpression> for ArxValidator {
    fn validate(&self, arx: &ApprovalRequestExpression) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();

        match &arx.document_type_id {
            None => failures.push(ValidationFailure::required("DocumentTypeId")),
            Some(id) if id.is_nil() => failures.push(ValidationFailure::new(
                "DocumentTypeId",
                "DocumentTypeId must not be an empty GUID",
            )),
            Some(_) => {}
        }

        failures.extend(self.validate_operation(arx.operation_fields()));
        failures.extend(self.validate_children(arx));

        failures.into_iter().map(|f| f.under(ROOT)).collect()
    }
}

fn require(present: bool, property: &str, failures: &mut Vec<ValidationFailure>) {
    if !present {
        failures.push(ValidationFailure::required(property));
    }
}

fn require_approvers(approvers: Option<&[Approver]>, failures: &mut Vec<ValidationFailure>) {
    if approvers.is_none_or(<[Approver]>::is_empty) {
        failures.push(ValidationFailure::new(
            "Approvers",
            "At least one approver is required",
        ));
    }
}

fn require_delete_for(delete_for: Option<&[String]>, failures: &mut Vec<ValidationFailure>) {
    if delete_for.is_none_or(<[String]>::is_empty) {
        failures.push(ValidationFailure::required("DeleteFor"));
    }
}

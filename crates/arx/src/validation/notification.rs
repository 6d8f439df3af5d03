use crate::model::{NotificationDetail, ReminderDetail};

use super::{ValidationFailure, Validator, is_blank, nested};

/// Either explicit reminder dates, or a positive frequency with an expiration.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReminderValidator;

impl Validator<ReminderDetail> for ReminderValidator {
    fn validate(&self, reminder: &ReminderDetail) -> Vec<ValidationFailure> {
        let has_dates = reminder.reminder_dates.as_ref().is_some_and(|d| !d.is_empty());
        if has_dates {
            return Vec::new();
        }

        let mut failures = Vec::new();
        if reminder.frequency.is_none_or(|f| f == 0) {
            failures.push(ValidationFailure::new(
                "Frequency",
                "Frequency must be greater than zero when no reminder dates are given",
            ));
        }
        if reminder.expiration.is_none() {
            failures.push(ValidationFailure::new(
                "Expiration",
                "Expiration is required when no reminder dates are given",
            ));
        }
        failures
    }
}

pub struct NotificationDetailValidator {
    reminder: Box<dyn Validator<ReminderDetail>>,
}

impl NotificationDetailValidator {
    pub fn new(reminder: Box<dyn Validator<ReminderDetail>>) -> Self {
        Self { reminder }
    }
}

impl Default for NotificationDetailValidator {
    fn default() -> Self {
        Self::new(Box::new(ReminderValidator))
    }
}

impl Validator<NotificationDetail> for NotificationDetailValidator {
    fn validate(&self, detail: &NotificationDetail) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        if is_blank(&detail.template_key) {
            failures.push(ValidationFailure::required("TemplateKey"));
        }
        if is_blank(&detail.to) {
            failures.push(ValidationFailure::required("To"));
        }
        if let Some(reminder) = &detail.reminder {
            failures.extend(nested(self.reminder.as_ref(), reminder, "Reminder"));
        }
        failures
    }
}

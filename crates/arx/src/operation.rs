use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::model::{ActionDetail, ApprovalRequestExpression, Approver, SummaryJson};

/// Operation requested by a tenant for a pending-approval document.
///
/// Accepts either the variant name (case-insensitive) or its 1-based ordinal
/// on the wire; always serializes as the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
    TargetedAction,
    Complete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::TargetedAction,
        Operation::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "Create",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
            Operation::TargetedAction => "TargetedAction",
            Operation::Complete => "Complete",
        }
    }

    /// Template used when the tenant did not name one in `NotificationDetail`.
    pub fn default_template_key(&self) -> &'static str {
        match self {
            Operation::Create | Operation::Update => "PendingApproval",
            Operation::Delete => "ApprovalWithdrawn",
            Operation::TargetedAction | Operation::Complete => "ActionTaken",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(name.trim()))
    }

    fn from_ordinal(ordinal: u64) -> Option<Self> {
        let index = usize::try_from(ordinal).ok()?.checked_sub(1)?;
        Self::ALL.get(index).copied()
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OperationVisitor;

        impl Visitor<'_> for OperationVisitor {
            type Value = Operation;

            fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("an operation name or its ordinal")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Operation, E> {
                Operation::from_name(v)
                    .ok_or_else(|| E::custom(format!("unknown operation: {v}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Operation, E> {
                Operation::from_ordinal(v)
                    .ok_or_else(|| E::custom(format!("unknown operation ordinal: {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Operation, E> {
                let v = u64::try_from(v)
                    .map_err(|_| E::custom(format!("unknown operation ordinal: {v}")))?;
                self.visit_u64(v)
            }
        }

        deserializer.deserialize_any(OperationVisitor)
    }
}

/// Operation-specific view over the flat wire model.
///
/// Each variant carries exactly the fields whose presence rules depend on the
/// operation, so validation is an exhaustive match rather than a set of
/// scattered `if` checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperationFields<'a> {
    Create {
        approvers: Option<&'a [Approver]>,
        summary: Option<&'a SummaryJson>,
        action_detail: Option<&'a ActionDetail>,
    },
    Update {
        approvers: Option<&'a [Approver]>,
        summary: Option<&'a SummaryJson>,
        delete_for: Option<&'a [String]>,
        action_detail: Option<&'a ActionDetail>,
    },
    Delete {
        delete_for: Option<&'a [String]>,
        action_detail: Option<&'a ActionDetail>,
    },
    TargetedAction,
    Complete,
}

impl<'a> OperationFields<'a> {
    pub fn of(arx: &'a ApprovalRequestExpression) -> Self {
        let approvers = arx.approvers.as_deref();
        let summary = arx.summary_data.as_ref();
        let delete_for = arx.delete_for.as_deref();
        let action_detail = arx.action_detail.as_ref();

        match arx.operation {
            Operation::Create => OperationFields::Create {
                approvers,
                summary,
                action_detail,
            },
            Operation::Update => OperationFields::Update {
                approvers,
                summary,
                delete_for,
                action_detail,
            },
            Operation::Delete => OperationFields::Delete {
                delete_for,
                action_detail,
            },
            Operation::TargetedAction => OperationFields::TargetedAction,
            Operation::Complete => OperationFields::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_names_case_insensitively() {
        let op: Operation = serde_json::from_str("\"targetedaction\"").unwrap();
        assert_eq!(op, Operation::TargetedAction);
    }

    #[test]
    fn accepts_ordinals() {
        let op: Operation = serde_json::from_str("3").unwrap();
        assert_eq!(op, Operation::Delete);
        assert!(serde_json::from_str::<Operation>("0").is_err());
        assert!(serde_json::from_str::<Operation>("9").is_err());
    }

    #[test]
    fn serializes_as_name() {
        assert_eq!(serde_json::to_string(&Operation::Complete).unwrap(), "\"Complete\"");
    }
}

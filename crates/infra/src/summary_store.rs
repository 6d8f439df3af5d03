//! Pending-approval summary rows and the default persistence logic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use approvals_arx::{
    ApprovalRequestExpression, ApprovalSummaryRow, ApprovalTenantInfo, Operation,
};
use approvals_core::DocumentTypeId;

use crate::collaborators::TenantBusinessLogic;

/// Row key: one row per approver per document. Approver and document
/// number compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryKey {
    pub document_type_id: DocumentTypeId,
    pub document_number: String,
    pub approver: String,
}

impl SummaryKey {
    pub fn new(document_type_id: DocumentTypeId, document_number: &str, approver: &str) -> Self {
        Self {
            document_type_id,
            document_number: document_number.trim().to_lowercase(),
            approver: approver.trim().to_lowercase(),
        }
    }

    pub fn of(row: &ApprovalSummaryRow) -> Self {
        Self::new(row.document_type_id, &row.document_number, &row.approver)
    }
}

/// Key/value store for summary rows.
pub trait SummaryStore: Send + Sync {
    fn get(&self, key: &SummaryKey) -> Option<ApprovalSummaryRow>;
    fn upsert(&self, row: ApprovalSummaryRow);
    fn remove(&self, key: &SummaryKey) -> Option<ApprovalSummaryRow>;
    fn rows_for_document(
        &self,
        document_type_id: DocumentTypeId,
        document_number: &str,
    ) -> Vec<ApprovalSummaryRow>;
}

impl<S> SummaryStore for Arc<S>
where
    S: SummaryStore + ?Sized,
{
    fn get(&self, key: &SummaryKey) -> Option<ApprovalSummaryRow> {
        (**self).get(key)
    }

    fn upsert(&self, row: ApprovalSummaryRow) {
        (**self).upsert(row)
    }

    fn remove(&self, key: &SummaryKey) -> Option<ApprovalSummaryRow> {
        (**self).remove(key)
    }

    fn rows_for_document(
        &self,
        document_type_id: DocumentTypeId,
        document_number: &str,
    ) -> Vec<ApprovalSummaryRow> {
        (**self).rows_for_document(document_type_id, document_number)
    }
}

/// In-memory summary store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySummaryStore {
    inner: RwLock<HashMap<SummaryKey, ApprovalSummaryRow>>,
}

impl InMemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SummaryStore for InMemorySummaryStore {
    fn get(&self, key: &SummaryKey) -> Option<ApprovalSummaryRow> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn upsert(&self, row: ApprovalSummaryRow) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(SummaryKey::of(&row), row);
        }
    }

    fn remove(&self, key: &SummaryKey) -> Option<ApprovalSummaryRow> {
        self.inner.write().ok()?.remove(key)
    }

    fn rows_for_document(
        &self,
        document_type_id: DocumentTypeId,
        document_number: &str,
    ) -> Vec<ApprovalSummaryRow> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let number = document_number.trim().to_lowercase();
        let mut rows: Vec<_> = map
            .iter()
            .filter(|(k, _)| k.document_type_id == document_type_id && k.document_number == number)
            .map(|(_, v)| v.clone())
            .collect();
        rows.sort_by(|a, b| a.approver.cmp(&b.approver));
        rows
    }
}

/// Default tenant logic: keeps one summary row per pending approver.
///
/// Every operation is an upsert or a delete by key, so replaying the same
/// expression leaves the store unchanged.
pub struct SummaryTenantLogic<S> {
    store: S,
}

impl<S: SummaryStore> SummaryTenantLogic<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn upsert_approvers(&self, arx: &ApprovalRequestExpression, id: DocumentTypeId) -> anyhow::Result<Vec<ApprovalSummaryRow>> {
        let summary_json = arx
            .summary_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let last_updated = arx.operation_date_time.unwrap_or_else(Utc::now);

        let rows: Vec<_> = arx
            .approver_aliases()
            .into_iter()
            .map(|alias| ApprovalSummaryRow {
                approver: alias.to_string(),
                document_type_id: id,
                document_number: arx.document_number().to_string(),
                operation: arx.operation,
                summary_json: summary_json.clone(),
                last_updated,
            })
            .collect();

        for row in &rows {
            self.store.upsert(row.clone());
        }
        Ok(rows)
    }

    fn remove_aliases(&self, arx: &ApprovalRequestExpression, id: DocumentTypeId) -> Vec<ApprovalSummaryRow> {
        arx.delete_for
            .iter()
            .flatten()
            .filter_map(|alias| {
                self.store
                    .remove(&SummaryKey::new(id, arx.document_number(), alias))
            })
            .collect()
    }
}

#[async_trait]
impl<S: SummaryStore> TenantBusinessLogic for SummaryTenantLogic<S> {
    async fn process_approval(
        &self,
        arx: &ApprovalRequestExpression,
        tenant: &ApprovalTenantInfo,
    ) -> anyhow::Result<Vec<ApprovalSummaryRow>> {
        let id = arx
            .document_type_id
            .ok_or_else(|| anyhow::anyhow!("expression has no document type"))?;
        tracing::debug!(
            app = %tenant.app_name,
            document_number = arx.document_number(),
            operation = %arx.operation,
            "persisting summary rows"
        );

        match arx.operation {
            Operation::Create => self.upsert_approvers(arx, id),
            Operation::Update => {
                self.remove_aliases(arx, id);
                self.upsert_approvers(arx, id)
            }
            Operation::Delete => Ok(self.remove_aliases(arx, id)),
            Operation::Complete => {
                let rows = self.store.rows_for_document(id, arx.document_number());
                for row in &rows {
                    self.store.remove(&SummaryKey::of(row));
                }
                Ok(rows)
            }
            Operation::TargetedAction => Ok(self.store.rows_for_document(id, arx.document_number())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approvals_arx::{ActionDetail, ApprovalIdentifier, Approver, SummaryJson};
    use uuid::Uuid;

    fn create(id: DocumentTypeId) -> ApprovalRequestExpression {
        let mut arx = ApprovalRequestExpression::new(id, Operation::Create);
        arx.approval_identifier = Some(ApprovalIdentifier {
            display_document_number: "PO-100".into(),
            document_number: "100".into(),
            fiscal_year: None,
        });
        arx.approvers = Some(vec![Approver::with_alias("alice"), Approver::with_alias("bob")]);
        arx.summary_data = Some(SummaryJson {
            title: "PO-100".into(),
            ..SummaryJson::default()
        });
        arx.operation_date_time = Some(Utc::now());
        arx
    }

    #[tokio::test]
    async fn replaying_an_expression_is_idempotent() {
        let id = DocumentTypeId::from_uuid(Uuid::now_v7());
        let tenant = ApprovalTenantInfo::new("Purchasing", id);
        let logic = SummaryTenantLogic::new(InMemorySummaryStore::new());
        let arx = create(id);

        logic.process_approval(&arx, &tenant).await.unwrap();
        let first = logic.store().rows_for_document(id, "100");
        logic.process_approval(&arx, &tenant).await.unwrap();
        let second = logic.store().rows_for_document(id, "100");

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn update_and_delete_remove_rows() {
        let id = DocumentTypeId::from_uuid(Uuid::now_v7());
        let tenant = ApprovalTenantInfo::new("Purchasing", id);
        let logic = SummaryTenantLogic::new(InMemorySummaryStore::new());
        logic.process_approval(&create(id), &tenant).await.unwrap();

        let mut update = create(id);
        update.operation = Operation::Update;
        update.approvers = Some(vec![Approver::with_alias("carol")]);
        update.delete_for = Some(vec!["ALICE".into()]);
        update.action_detail = Some(ActionDetail::default());
        logic.process_approval(&update, &tenant).await.unwrap();
        let approvers: Vec<_> = logic
            .store()
            .rows_for_document(id, "100")
            .into_iter()
            .map(|r| r.approver)
            .collect();
        assert_eq!(approvers, ["bob", "carol"]);

        let mut delete = ApprovalRequestExpression::new(id, Operation::Delete);
        delete.approval_identifier = update.approval_identifier.clone();
        delete.delete_for = Some(vec!["bob".into(), "carol".into()]);
        let removed = logic.process_approval(&delete, &tenant).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(logic.store().is_empty());
    }
}

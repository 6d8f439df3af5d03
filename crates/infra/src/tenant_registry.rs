use std::sync::RwLock;

use async_trait::async_trait;

use approvals_arx::ApprovalTenantInfo;
use approvals_core::DocumentTypeId;

/// Source of tenant configuration.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// All configured tenants; `fetch_images` also loads tenant images.
    async fn get_tenants(&self, fetch_images: bool) -> anyhow::Result<Vec<ApprovalTenantInfo>>;

    /// The tenant owning `document_type_id`, matched case-insensitively.
    async fn find_tenant(
        &self,
        document_type_id: &DocumentTypeId,
    ) -> anyhow::Result<Option<ApprovalTenantInfo>> {
        Ok(self
            .get_tenants(false)
            .await?
            .into_iter()
            .find(|t| t.owns(document_type_id)))
    }
}

/// In-memory registry for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTenantRegistry {
    tenants: RwLock<Vec<ApprovalTenantInfo>>,
}

impl InMemoryTenantRegistry {
    pub fn new(tenants: Vec<ApprovalTenantInfo>) -> Self {
        Self {
            tenants: RwLock::new(tenants),
        }
    }

    pub fn upsert(&self, tenant: ApprovalTenantInfo) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.retain(|t| !t.doc_type_id.eq_ignore_ascii_case(&tenant.doc_type_id));
            tenants.push(tenant);
        }
    }
}

#[async_trait]
impl TenantRegistry for InMemoryTenantRegistry {
    async fn get_tenants(&self, fetch_images: bool) -> anyhow::Result<Vec<ApprovalTenantInfo>> {
        let tenants = self
            .tenants
            .read()
            .map_err(|_| anyhow::anyhow!("tenant registry lock poisoned"))?
            .clone();

        if fetch_images {
            return Ok(tenants);
        }
        Ok(tenants
            .into_iter()
            .map(|t| ApprovalTenantInfo {
                tenant_image: None,
                ..t
            })
            .collect())
    }
}

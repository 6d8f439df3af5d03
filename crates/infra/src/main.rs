//! Local pipeline runner backed by the in-memory collaborators.
//!
//! Tenants are read from the JSON array at `APPROVALS_TENANTS_FILE` when set.
//! Teams notifications go over HTTP to the configured endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use approvals_arx::ApprovalTenantInfo;
use approvals_events::InMemoryBroker;
use approvals_infra::audit_store::InMemoryAuditStore;
use approvals_infra::blob_store::InMemoryBlobStore;
use approvals_infra::collaborators::memory::{
    RecordingEmailClient, StaticFlighting, StaticNameResolver, StaticRenderer, StaticTokenProvider,
};
use approvals_infra::notification::HttpTeamsTransport;
use approvals_infra::summary_store::{InMemorySummaryStore, SummaryTenantLogic};
use approvals_infra::tenant_registry::InMemoryTenantRegistry;
use approvals_infra::{PipelineConfig, PipelineDeps, PipelineHost};
use approvals_observability::TracingSink;

fn load_tenants() -> anyhow::Result<Vec<ApprovalTenantInfo>> {
    let Ok(path) = std::env::var("APPROVALS_TENANTS_FILE") else {
        tracing::warn!("APPROVALS_TENANTS_FILE not set; starting without tenants");
        return Ok(Vec::new());
    };
    let raw = std::fs::read(&path).with_context(|| format!("reading tenants from {path}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing tenants in {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    approvals_observability::init();

    let config = PipelineConfig::from_env()?;
    let tenants = load_tenants()?;
    tracing::info!(tenants = tenants.len(), "configuration loaded");

    let deps = PipelineDeps {
        broker: Arc::new(InMemoryBroker::new()),
        blobs: Arc::new(InMemoryBlobStore::new()),
        tenants: Arc::new(InMemoryTenantRegistry::new(tenants)),
        logic: Arc::new(SummaryTenantLogic::new(InMemorySummaryStore::new())),
        audit_store: Arc::new(InMemoryAuditStore::new()),
        email: Arc::new(RecordingEmailClient::new()),
        renderer: Arc::new(StaticRenderer::new()),
        flighting: Arc::new(StaticFlighting::new(Vec::<String>::new())),
        names: Arc::new(StaticNameResolver::new(Vec::new())),
        tokens: Arc::new(StaticTokenProvider::new("dev-token")),
        teams: Arc::new(HttpTeamsTransport::new(Duration::from_secs(30))?),
        tracking: Arc::new(TracingSink),
    };

    let host = PipelineHost::new(config, deps);
    let running = host.start();
    tracing::info!(topics = ?running.topics(), "listening");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    running.shutdown().await;
    Ok(())
}

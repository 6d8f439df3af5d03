//! Wires receivers, processors and workers into a running pipeline.

use std::sync::Arc;

use approvals_arx::{ArxConverter, ArxValidator};
use approvals_events::MessageBroker;
use approvals_observability::TrackingSink;

use crate::audit_agent::AuditAgent;
use crate::audit_store::AuditStore;
use crate::blob_store::BlobStore;
use crate::collaborators::{
    ActionableRenderer, EmailClient, FlightingClient, NameResolver, TenantBusinessLogic,
    TokenProvider,
};
use crate::config::PipelineConfig;
use crate::notification::{NotificationProcessor, TeamsNotifier, TeamsTransport};
use crate::receiver::{ActionableEmailReceiver, MainTopicReceiver, NotificationTopicReceiver};
use crate::tenant_registry::TenantRegistry;
use crate::workers::{
    ActionableEmailHandler, AuditTopicHandler, MainTopicHandler, NotificationTopicHandler,
    RetryTopicHandler, TopicWorker, WorkerHandle,
};

/// External collaborators the pipeline runs against.
#[derive(Clone)]
pub struct PipelineDeps {
    pub broker: Arc<dyn MessageBroker>,
    pub blobs: Arc<dyn BlobStore>,
    pub tenants: Arc<dyn TenantRegistry>,
    pub logic: Arc<dyn TenantBusinessLogic>,
    pub audit_store: Arc<dyn AuditStore>,
    pub email: Arc<dyn EmailClient>,
    pub renderer: Arc<dyn ActionableRenderer>,
    pub flighting: Arc<dyn FlightingClient>,
    pub names: Arc<dyn NameResolver>,
    pub tokens: Arc<dyn TokenProvider>,
    pub teams: Arc<dyn TeamsTransport>,
    pub tracking: Arc<dyn TrackingSink>,
}

/// The assembled components, before any worker is started.
pub struct PipelineHost {
    config: Arc<PipelineConfig>,
    broker: Arc<dyn MessageBroker>,
    main: Arc<MainTopicReceiver>,
    notification: Arc<NotificationTopicReceiver>,
    actionable: Arc<ActionableEmailReceiver>,
    audit: Arc<AuditAgent>,
}

impl PipelineHost {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Self {
        Self::with_components(config, deps, ArxConverter::default(), ArxValidator::default())
    }

    pub fn with_components(
        config: PipelineConfig,
        deps: PipelineDeps,
        converter: ArxConverter,
        validator: ArxValidator,
    ) -> Self {
        let config = Arc::new(config);

        let main = MainTopicReceiver::new(
            config.clone(),
            converter.clone(),
            Arc::new(validator),
            deps.broker.clone(),
            deps.blobs.clone(),
            deps.tenants.clone(),
            deps.logic.clone(),
            deps.tracking.clone(),
        );
        let processor = NotificationProcessor::new(
            config.clone(),
            deps.broker.clone(),
            deps.blobs.clone(),
            deps.email.clone(),
            deps.renderer.clone(),
            deps.logic.clone(),
            deps.tracking.clone(),
        );
        let teams = TeamsNotifier::new(
            config.clone(),
            deps.flighting.clone(),
            deps.names.clone(),
            deps.tokens.clone(),
            deps.teams.clone(),
            deps.tracking.clone(),
        );
        let notification = NotificationTopicReceiver::new(
            config.clone(),
            converter.clone(),
            deps.broker.clone(),
            deps.blobs.clone(),
            deps.tenants.clone(),
            Arc::new(processor),
            Arc::new(teams),
            deps.tracking.clone(),
        );
        let actionable = ActionableEmailReceiver::new(
            config.clone(),
            converter.clone(),
            deps.broker.clone(),
            deps.blobs.clone(),
            deps.email.clone(),
            deps.tracking.clone(),
        );
        let audit = AuditAgent::new(
            config.clone(),
            converter,
            deps.blobs.clone(),
            deps.tenants.clone(),
            deps.audit_store.clone(),
            deps.tracking.clone(),
        );

        Self {
            config,
            broker: deps.broker,
            main: Arc::new(main),
            notification: Arc::new(notification),
            actionable: Arc::new(actionable),
            audit: Arc::new(audit),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn main_receiver(&self) -> &Arc<MainTopicReceiver> {
        &self.main
    }

    pub fn notification_receiver(&self) -> &Arc<NotificationTopicReceiver> {
        &self.notification
    }

    pub fn actionable_receiver(&self) -> &Arc<ActionableEmailReceiver> {
        &self.actionable
    }

    pub fn audit_agent(&self) -> &Arc<AuditAgent> {
        &self.audit
    }

    /// Start one worker per topic. Must be called inside a tokio runtime.
    pub fn start(&self) -> RunningPipeline {
        let topics = &self.config.topics;
        let concurrency = self.config.max_concurrent_messages;
        let broker = self.broker.as_ref();

        let handles = vec![
            TopicWorker::spawn(broker, &topics.main, Arc::new(MainTopicHandler(self.main.clone())), concurrency),
            TopicWorker::spawn(broker, &topics.retry, Arc::new(RetryTopicHandler(self.main.clone())), concurrency),
            TopicWorker::spawn(
                broker,
                &topics.notification,
                Arc::new(NotificationTopicHandler(self.notification.clone())),
                concurrency,
            ),
            TopicWorker::spawn(
                broker,
                &topics.actionable_email,
                Arc::new(ActionableEmailHandler(self.actionable.clone())),
                concurrency,
            ),
            TopicWorker::spawn(
                broker,
                &topics.audit,
                Arc::new(AuditTopicHandler {
                    agent: self.audit.clone(),
                    broker: self.broker.clone(),
                    topic: topics.audit.clone(),
                }),
                concurrency,
            ),
        ];

        tracing::info!(workers = handles.len(), "pipeline started");
        RunningPipeline { handles }
    }
}

/// Workers of a started pipeline.
#[derive(Debug)]
pub struct RunningPipeline {
    handles: Vec<WorkerHandle>,
}

impl RunningPipeline {
    pub fn topics(&self) -> Vec<&str> {
        self.handles.iter().map(WorkerHandle::topic).collect()
    }

    /// Stop every worker, waiting for in-flight messages.
    pub async fn shutdown(self) {
        for handle in self.handles {
            handle.shutdown().await;
        }
        tracing::info!("pipeline stopped");
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::warn;

use approvals_events::{BrokerMessage, MessageBroker, Subscription};

/// Processes messages delivered on one topic.
///
/// Handlers settle their own messages; an error returned here is only
/// logged by the worker.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, message: BrokerMessage) -> anyhow::Result<()>;
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    topic: String,
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop receiving, wait for in-flight messages, then return.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(topic = %self.topic, error = %err, "topic worker task failed");
            }
        }
    }
}

/// Drains a topic subscription.
///
/// - Subscribes before returning, so nothing published afterwards is missed
/// - Runs up to `max_concurrent` handlers at once
/// - On shutdown stops receiving and waits for in-flight handlers
#[derive(Debug)]
pub struct TopicWorker;

impl TopicWorker {
    pub fn spawn(
        broker: &dyn MessageBroker,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        max_concurrent: usize,
    ) -> WorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let sub = broker.subscribe(topic);
        let join = tokio::spawn(worker_loop(sub, handler, shutdown.clone(), max_concurrent.max(1)));

        WorkerHandle {
            topic: topic.to_string(),
            shutdown,
            join: Some(join),
        }
    }
}

async fn worker_loop(
    mut sub: Subscription,
    handler: Arc<dyn MessageHandler>,
    shutdown: Arc<Notify>,
    max_concurrent: usize,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));
    tracing::info!(worker = handler.name(), topic = sub.topic(), max_concurrent, "topic worker started");

    loop {
        let permit = tokio::select! {
            _ = shutdown.notified() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let message = tokio::select! {
            _ = shutdown.notified() => break,
            message = sub.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let message_id = message.message_id().to_string();
            if let Err(err) = handler.handle(message).await {
                warn!(worker = handler.name(), message_id = %message_id, error = %format!("{err:#}"), "message handler failed");
            }
        });
    }

    // Every permit back means every handler has finished.
    let all = u32::try_from(max_concurrent).unwrap_or(u32::MAX);
    if permits.acquire_many(all).await.is_err() {
        warn!(worker = handler.name(), "permit pool closed during shutdown");
    }
    tracing::info!(worker = handler.name(), topic = sub.topic(), "topic worker stopped");
}

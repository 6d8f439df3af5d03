//! Background workers that drain broker topics.

pub mod handlers;
pub mod topic_worker;

pub use handlers::{
    ActionableEmailHandler, AuditTopicHandler, MainTopicHandler, NotificationTopicHandler,
    RetryTopicHandler,
};
pub use topic_worker::{MessageHandler, TopicWorker, WorkerHandle};

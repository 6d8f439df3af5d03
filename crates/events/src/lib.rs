//! Broker envelope, topics and the pub/sub abstraction.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;

pub use bus::{BrokerError, MessageBroker, Subscription};
pub use envelope::{BLOB_CONTENT_VERSION, BrokerMessage, properties, topics};
pub use in_memory_bus::{
    DEFAULT_MAX_DELIVERY_COUNT, DeadLetteredMessage, InMemoryBroker, MAX_DELIVERY_COUNT_EXCEEDED,
};

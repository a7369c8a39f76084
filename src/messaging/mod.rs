// ============================================================================
// Messaging - broker abstraction and the ingestion consumer loop
// ============================================================================

mod handler;
mod kafka;
mod offsets;
mod subscriber;

pub use handler::{MessageHandler, OrderHandler};
pub use kafka::KafkaBroker;
pub use offsets::OffsetTracker;
pub use subscriber::subscribe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::lifecycle::Backend;

/// A record fetched from the broker, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub headers: HashMap<String, Vec<u8>>,
}

impl Message {
    /// Key rendered for logs
    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("invalid broker configuration: {0}")]
    Config(String),

    #[error("broker connection closed")]
    Closed,
}

/// Capability set of a message source with explicit offset commits.
#[async_trait]
pub trait Broker: Backend {
    /// Wait for the next message.
    async fn fetch(&self) -> Result<Message, BrokerError>;

    /// Mark `offset` of `partition` as processed; the consumer group resumes
    /// after it.
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError>;

    /// Move the fetch position of `partition` back to `offset`, so that
    /// later fetches deliver it and everything after it again.
    async fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError>;
}

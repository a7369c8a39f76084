use async_trait::async_trait;
use chrono::DateTime;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Broker, BrokerError, Message};
use crate::config::KafkaConfig;
use crate::lifecycle::Backend;
use crate::metrics::Metrics;

// ============================================================================
// Consumer Context
// ============================================================================
//
// Async commits only fail locally when the request cannot be queued. The
// broker's answer (rebalance in progress, unknown member, coordinator moved)
// arrives later through `commit_callback`.
//
// ============================================================================

pub struct OrderConsumerContext {
    metrics: Arc<Metrics>,
}

impl OrderConsumerContext {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl ClientContext for OrderConsumerContext {}

impl ConsumerContext for OrderConsumerContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => tracing::debug!(?offsets, "Broker acknowledged offset commit"),
            Err(e) => {
                self.metrics.record_commit_failure();
                tracing::error!(error = %e, ?offsets, "Broker rejected offset commit");
            }
        }
    }
}

/// Consumer-group member of the orders topic with manual offset commits.
pub struct KafkaBroker {
    consumer: StreamConsumer<OrderConsumerContext>,
    topic: String,
    max_workers: usize,
    retry_interval: Duration,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig, metrics: Arc<Metrics>) -> Result<Self, BrokerError> {
        if config.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(BrokerError::Config("empty broker address".to_string()));
        }

        let consumer: StreamConsumer<OrderConsumerContext> = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", config.start_offset.as_reset_policy())
            .set("fetch.min.bytes", config.min_bytes.to_string())
            .set("fetch.max.bytes", config.max_bytes.to_string())
            .set("fetch.wait.max.ms", config.read_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create_with_context(OrderConsumerContext::new(metrics))?;

        consumer.subscribe(&[config.topic.as_str()])?;

        tracing::info!(
            brokers = %config.brokers.join(","),
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            max_workers: config.max_workers,
            retry_interval: config.retry_timeout(),
        })
    }

    /// Handlers allowed to run concurrently
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Pause after a failed fetch
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}

fn detach(msg: &BorrowedMessage<'_>) -> Message {
    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.unwrap_or_default().to_vec()))
                .collect()
        })
        .unwrap_or_else(HashMap::new);

    Message {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().unwrap_or_default().to_vec(),
        value: msg.payload().unwrap_or_default().to_vec(),
        timestamp: msg
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
        headers,
    }
}

#[async_trait]
impl Backend for KafkaBroker {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn close(&self) -> anyhow::Result<()> {
        tracing::debug!(topic = %self.topic, "Leaving consumer group");
        self.consumer.unsubscribe();
        Ok(())
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn fetch(&self) -> Result<Message, BrokerError> {
        let msg = self.consumer.recv().await?;
        Ok(detach(&msg))
    }

    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError> {
        // The committed position is the next offset to consume.
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
        self.consumer.commit(&tpl, CommitMode::Async)?;

        tracing::debug!(
            topic = %topic,
            partition = partition,
            offset = offset,
            "Offset commit requested"
        );
        Ok(())
    }

    async fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError> {
        // A zero timeout starts the seek without blocking the runtime; the
        // fetcher discards what it prefetched for the partition.
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), Duration::ZERO)?;

        tracing::info!(
            topic = %topic,
            partition = partition,
            offset = offset,
            "Partition rewound for redelivery"
        );
        Ok(())
    }
}

//! Apache Kafka log provider
//!
//! Implements `LogClient` on librdkafka (`rdkafka`): keyed publishes on a
//! `FutureProducer`, consumer-group members with manual offset store and
//! synchronous commit.

mod config;
mod consumer;

pub use config::KafkaConfig;
pub use consumer::KafkaConsumer;

use crate::error::{EventError, Result};
use crate::provider::{LogClient, LogConsumer};
use crate::types::{DeliveryReceipt, OutboundRecord};
use async_trait::async_trait;
use rdkafka::consumer::StreamConsumer;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;

/// Header carrying the producer-side dedup id (the event id)
const EVENT_ID_HEADER: &str = "activity-event-id";

/// Kafka log client
pub struct KafkaLog {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaLog {
    /// Create the producer and check that a broker answers
    pub async fn connect(config: KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| EventError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        // librdkafka connects lazily; a metadata request surfaces a dead cluster now
        let client = producer.clone();
        let timeout = config.metadata_timeout();
        tokio::task::spawn_blocking(move || {
            client.client().fetch_metadata(None, timeout).map(|_| ())
        })
        .await
        .map_err(|e| EventError::Connection(format!("metadata task failed: {}", e)))?
        .map_err(|e| EventError::Connection(format!("{}: {}", config.broker_list(), e)))?;

        tracing::info!(
            brokers = %config.broker_list(),
            acks = config.effective_acks(),
            idempotence = config.enable_idempotence,
            "Connected to Kafka"
        );

        Ok(Self { producer, config })
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }
}

#[async_trait]
impl LogClient for KafkaLog {
    async fn publish(&self, record: OutboundRecord) -> Result<DeliveryReceipt> {
        let mut headers = OwnedHeaders::new();
        if let Some(dedup_id) = record.dedup_id.as_deref() {
            headers = headers.insert(Header {
                key: EVENT_ID_HEADER,
                value: Some(dedup_id.as_bytes()),
            });
        }

        let kafka_record = FutureRecord::to(&record.topic)
            .key(record.key.as_str())
            .payload(&record.payload[..])
            .headers(headers);

        let queue_timeout = Duration::from_millis(self.config.message_timeout_ms);
        let (partition, offset) = self
            .producer
            .send(kafka_record, queue_timeout)
            .await
            .map_err(|(e, _)| EventError::Publish {
                topic: record.topic.clone(),
                reason: e.to_string(),
            })?;

        Ok(DeliveryReceipt { partition, offset })
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| EventError::Connection(format!("flush task failed: {}", e)))?
            .map_err(|e| EventError::Timeout(format!("Kafka flush incomplete: {}", e)))
    }

    async fn consumer(&self, group_id: &str) -> Result<Box<dyn LogConsumer>> {
        let consumer: StreamConsumer = self
            .config
            .consumer_config(group_id)
            .create()
            .map_err(|e| EventError::Consumer(format!("Failed to create Kafka consumer: {}", e)))?;

        Ok(Box::new(KafkaConsumer::new(consumer, group_id.to_string())))
    }

    fn name(&self) -> &str {
        "kafka"
    }
}

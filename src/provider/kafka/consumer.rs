//! Kafka consumer with manual offset store and commit

use crate::error::{EventError, Result};
use crate::provider::LogConsumer;
use crate::types::LogMessage;
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Group member over a librdkafka `StreamConsumer`
///
/// Auto commit and auto offset store are both off. `store_offset` records
/// the position in librdkafka and locally; `commit` synchronously commits
/// that stored position for the message's partition.
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    group: String,
    topic: Option<String>,

    /// partition → next offset to read, as stored
    stored: HashMap<i32, i64>,
}

impl KafkaConsumer {
    pub(crate) fn new(consumer: StreamConsumer, group: String) -> Self {
        Self {
            consumer: Arc::new(consumer),
            group,
            topic: None,
            stored: HashMap::new(),
        }
    }
}

#[async_trait]
impl LogConsumer for KafkaConsumer {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| EventError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        self.topic = Some(topic.to_string());

        tracing::info!(group = %self.group, topic, "Kafka consumer subscribed");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogMessage>> {
        if self.topic.is_none() {
            return Err(EventError::Consumer("poll before subscribe".to_string()));
        }

        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(EventError::Consumer(format!("Kafka receive failed: {}", e))),
            Ok(Ok(message)) => Ok(Some(LogMessage {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message
                    .key()
                    .map(|key| String::from_utf8_lossy(key).into_owned()),
                payload: Bytes::copy_from_slice(message.payload().unwrap_or_default()),
            })),
        }
    }

    async fn store_offset(&mut self, message: &LogMessage) -> Result<()> {
        // librdkafka stores offset + 1, the next position to read
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset)
            .map_err(|e| EventError::Commit {
                partition: message.partition,
                offset: message.offset,
                reason: format!("store failed: {}", e),
            })?;
        self.stored.insert(message.partition, message.offset + 1);
        Ok(())
    }

    async fn commit(&mut self, message: &LogMessage) -> Result<()> {
        let commit_error = |reason: String| EventError::Commit {
            partition: message.partition,
            offset: message.offset,
            reason,
        };

        let next = match self.stored.get(&message.partition) {
            Some(&next) if next > message.offset => next,
            _ => return Err(commit_error("offset was not stored before commit".to_string())),
        };

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&message.topic, message.partition, Offset::Offset(next))
            .map_err(|e| commit_error(e.to_string()))?;

        // Synchronous commit is a blocking broker round trip
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| commit_error(format!("commit task failed: {}", e)))?
            .map_err(|e| commit_error(e.to_string()))?;

        tracing::debug!(
            partition = message.partition,
            offset = message.offset,
            "Offset committed"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.topic.take().is_some() {
            // Uncommitted messages are redelivered to the next group member
            self.consumer.unsubscribe();
            self.stored.clear();
            tracing::info!(group = %self.group, "Kafka consumer closed");
        }
        Ok(())
    }
}

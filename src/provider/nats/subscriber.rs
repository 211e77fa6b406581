//! NATS JetStream consumer: durable pull consumer with explicit acks

use super::client::KEY_HEADER;
use crate::error::{EventError, Result};
use crate::provider::LogConsumer;
use crate::types::LogMessage;
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// Durable JetStream pull consumer named after the consumer group
///
/// Every consumer with the same group name shares one server-side cursor.
/// Delivered-but-uncommitted messages are held until `commit`, then
/// double-acked so the commit is confirmed by the server.
pub struct NatsConsumer {
    jetstream: jetstream::Context,
    stream_name: String,
    group: String,
    topic: Option<String>,
    messages: Option<jetstream::consumer::pull::Stream>,

    /// offset (stream sequence) → message awaiting commit
    pending: HashMap<i64, jetstream::Message>,
}

impl NatsConsumer {
    pub(crate) fn new(jetstream: jetstream::Context, stream_name: String, group: String) -> Self {
        Self {
            jetstream,
            stream_name,
            group,
            topic: None,
            messages: None,
            pending: HashMap::new(),
        }
    }

    fn to_log_message(topic: &str, message: &jetstream::Message) -> Result<LogMessage> {
        let info = message
            .info()
            .map_err(|e| EventError::Consumer(format!("Message without JetStream info: {}", e)))?;

        let key = message
            .headers
            .as_ref()
            .and_then(|h| h.get(KEY_HEADER))
            .map(|v| v.as_str().to_string());

        Ok(LogMessage {
            topic: topic.to_string(),
            partition: 0,
            offset: info.stream_sequence as i64,
            key,
            payload: message.payload.clone(),
        })
    }
}

#[async_trait]
impl LogConsumer for NatsConsumer {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| EventError::Subscribe {
                topic: topic.to_string(),
                reason: format!("stream '{}' unavailable: {}", self.stream_name, e),
            })?;

        let consumer = stream
            .get_or_create_consumer(
                &self.group,
                jetstream::consumer::pull::Config {
                    durable_name: Some(self.group.clone()),
                    filter_subject: topic.to_string(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    deliver_policy: jetstream::consumer::DeliverPolicy::All,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EventError::Consumer(format!(
                "Failed to create durable consumer '{}': {}",
                self.group, e
            )))?;

        let messages = consumer.messages().await.map_err(|e| EventError::Subscribe {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        self.messages = Some(messages);
        self.topic = Some(topic.to_string());

        tracing::info!(consumer = %self.group, topic, "Durable subscription created");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogMessage>> {
        let (Some(topic), Some(messages)) = (self.topic.as_deref(), self.messages.as_mut()) else {
            return Err(EventError::Consumer("poll before subscribe".to_string()));
        };

        let next = match tokio::time::timeout(timeout, messages.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => {
                return Err(EventError::Consumer("message stream ended".to_string()));
            }
            Ok(Some(next)) => next,
        };

        let message =
            next.map_err(|e| EventError::Consumer(format!("Failed to receive message: {}", e)))?;
        let log_message = Self::to_log_message(topic, &message)?;
        self.pending.insert(log_message.offset, message);

        Ok(Some(log_message))
    }

    async fn store_offset(&mut self, message: &LogMessage) -> Result<()> {
        // JetStream tracks position server-side; only the ack matters
        tracing::trace!(offset = message.offset, "Offset stored");
        Ok(())
    }

    async fn commit(&mut self, message: &LogMessage) -> Result<()> {
        let pending = self.pending.remove(&message.offset).ok_or_else(|| EventError::Commit {
            partition: message.partition,
            offset: message.offset,
            reason: "message is not pending on this consumer".to_string(),
        })?;

        pending.double_ack().await.map_err(|e| EventError::Commit {
            partition: message.partition,
            offset: message.offset,
            reason: e.to_string(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        if self.messages.take().is_some() {
            // Unacked messages are redelivered after the ack wait
            self.pending.clear();
            self.topic = None;
            tracing::info!(consumer = %self.group, "Durable subscription closed");
        }
        Ok(())
    }
}

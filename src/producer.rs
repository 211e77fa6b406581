//! Event producer: publishes activity events onto the log topic
//!
//! The acknowledgement level is `ProducerSettings::acks`, leader-only by
//! default. With a leader-only ack a publish counts as sent once the leader
//! has the write, before followers replicate it, so a leader failure right
//! after the ack can still lose the event at the log layer.

use crate::config::ProducerSettings;
use crate::error::{EventError, Result};
use crate::provider::LogClient;
use crate::types::{ActivityEvent, DeliveryReceipt, OutboundRecord};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Publishes one event at a time per call; safe to share across tasks
///
/// At most `max_in_flight` publishes wait for an ack at once, which keeps
/// per-key ordering intact while the client retries. Failed publishes are
/// returned to the caller and never retried here.
pub struct EventProducer {
    client: Arc<dyn LogClient>,
    topic: String,
    settings: ProducerSettings,
    in_flight: Semaphore,
    permits: u32,
}

impl EventProducer {
    /// Create a producer for `topic`
    pub fn new(
        client: Arc<dyn LogClient>,
        topic: impl Into<String>,
        settings: ProducerSettings,
    ) -> Self {
        let permits = settings.max_in_flight.clamp(1, u32::MAX as usize);
        Self {
            client,
            topic: topic.into(),
            settings,
            in_flight: Semaphore::new(permits),
            permits: permits as u32,
        }
    }

    /// Topic this producer writes to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Name of the underlying log backend
    pub fn provider_name(&self) -> &str {
        self.client.name()
    }

    /// Publish an event keyed by its user id
    ///
    /// Returns the assigned partition and offset once acknowledged. On any
    /// failure (serialization, broker error, timeout) nothing is recorded
    /// and the caller decides whether to retry.
    pub async fn publish(&self, event: &ActivityEvent) -> Result<DeliveryReceipt> {
        let result = self.send(event).await;

        match &result {
            Ok(receipt) => tracing::info!(
                event_id = %event.id,
                user_id = %event.user_id,
                partition = receipt.partition,
                offset = receipt.offset,
                "Event published"
            ),
            Err(e) => tracing::error!(
                event_id = %event.id,
                topic = %self.topic,
                error = %e,
                "Failed to publish event"
            ),
        }

        result
    }

    async fn send(&self, event: &ActivityEvent) -> Result<DeliveryReceipt> {
        let record = OutboundRecord {
            topic: self.topic.clone(),
            key: event.user_id.clone(),
            payload: event.to_payload()?,
            dedup_id: self.settings.idempotent.then(|| event.id.clone()),
        };

        let timeout = self.settings.publish_timeout();
        let publish = async {
            let _permit = self.in_flight.acquire().await.map_err(|_| EventError::Publish {
                topic: self.topic.clone(),
                reason: "producer is shut down".to_string(),
            })?;
            self.client.publish(record).await
        };

        tokio::time::timeout(timeout, publish).await.map_err(|_| {
            EventError::Timeout(format!(
                "publish to '{}' not acknowledged within {:?}",
                self.topic, timeout
            ))
        })?
    }

    /// Wait for unacknowledged publishes and buffered sends, bounded by the
    /// flush timeout
    ///
    /// Stops admitting new publishes, so nothing slips in behind the flush.
    pub async fn flush(&self) -> Result<()> {
        let timeout = self.settings.flush_timeout();
        let drained =
            tokio::time::timeout(timeout, self.in_flight.acquire_many(self.permits)).await;
        self.in_flight.close();

        if drained.is_err() {
            tracing::warn!(
                topic = %self.topic,
                in_flight = self.permits as usize - self.in_flight.available_permits(),
                "Publishes still unacknowledged at flush timeout"
            );
            return Err(EventError::Timeout(format!(
                "producer flush exceeded {:?}",
                timeout
            )));
        }

        self.client.flush(timeout).await?;
        tracing::info!(topic = %self.topic, "Producer flushed");
        Ok(())
    }
}

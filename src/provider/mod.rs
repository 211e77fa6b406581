//! Log client traits: the seam between the pipeline and the log system
//!
//! The log system (Kafka, NATS JetStream or the in-memory log) is an external collaborator. The pipeline only relies on
//! publish-with-ack on one side and poll-then-commit on the other; ordering,
//! partitioning and retry behaviour belong to the implementation.

use crate::error::Result;
use crate::types::{DeliveryReceipt, LogMessage, OutboundRecord};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod nats;

/// Publish side of a log system, plus a factory for consumers
///
/// Implementations must be safe to share across tasks; concurrent
/// `publish` calls are multiplexed internally.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Publish a record and wait for the partition leader's acknowledgement
    ///
    /// Records with the same key land on the same partition in publish order.
    /// When `dedup_id` is set, a retried send with the same id must not
    /// produce a second log entry.
    async fn publish(&self, record: OutboundRecord) -> Result<DeliveryReceipt>;

    /// Wait for buffered-but-unacknowledged sends, bounded by `timeout`
    async fn flush(&self, timeout: Duration) -> Result<()>;

    /// Create a consumer belonging to `group_id`
    ///
    /// Committed offsets are shared by every consumer of the same group.
    async fn consumer(&self, group_id: &str) -> Result<Box<dyn LogConsumer>>;

    /// Backend name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}

/// Pull side of a log system, owned by a single consume loop
#[async_trait]
pub trait LogConsumer: Send {
    /// Start receiving messages from `topic`
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Wait up to `timeout` for the next message
    ///
    /// Returns `Ok(None)` when the wait elapses; that is not an error.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogMessage>>;

    /// Record the message's position locally, ahead of a commit
    async fn store_offset(&mut self, message: &LogMessage) -> Result<()>;

    /// Durably mark the message as processed for this consumer group
    async fn commit(&mut self, message: &LogMessage) -> Result<()>;

    /// Unsubscribe and release the connection
    ///
    /// Must be safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

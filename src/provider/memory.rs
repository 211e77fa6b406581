//! In-memory partitioned log
//!
//! A single-process stand-in for a Kafka-like broker: keyed partitioning,
//! per-partition offsets, per-group committed offsets and producer-side
//! deduplication. Used by tests and by `ACTIVITY_LOG_PROVIDER=memory`.
//! Nothing survives the process.

use super::{LogClient, LogConsumer};
use crate::error::{EventError, Result};
use crate::types::{DeliveryReceipt, LogMessage, OutboundRecord};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// In-memory log configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Partitions per topic, created on first publish
    pub partitions: usize,

    /// Honour `OutboundRecord::dedup_id`
    pub idempotent: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            partitions: 3,
            idempotent: true,
        }
    }
}

#[derive(Debug)]
struct StoredRecord {
    key: String,
    payload: Bytes,
}

#[derive(Default)]
struct LogState {
    /// topic → partitions → records (index = offset)
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,

    /// (group, topic, partition) → next offset to read
    committed: HashMap<(String, String, i32), i64>,

    /// dedup id → receipt of the first publish
    dedup: HashMap<String, DeliveryReceipt>,
}

struct Shared {
    config: MemoryConfig,
    state: Mutex<LogState>,

    /// Bumped on every append so waiting consumers wake up
    appended: watch::Sender<u64>,

    fail_publishes: AtomicBool,
    fail_polls: AtomicUsize,
    fail_commits: AtomicUsize,
}

/// In-memory log client
///
/// Cheap to clone; clones share the same log.
#[derive(Clone)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryLog {
    /// Create an empty log
    pub fn new(config: MemoryConfig) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                config: MemoryConfig {
                    partitions: config.partitions.max(1),
                    ..config
                },
                state: Mutex::new(LogState::default()),
                appended,
                fail_publishes: AtomicBool::new(false),
                fail_polls: AtomicUsize::new(0),
                fail_commits: AtomicUsize::new(0),
            }),
        }
    }

    /// Partition a key is routed to
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shared.config.partitions as u64) as i32
    }

    /// Total records appended to `topic` across all partitions
    pub async fn message_count(&self, topic: &str) -> usize {
        let state = self.shared.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Next offset `group` will read from `partition`, if it ever committed
    pub async fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.shared.state.lock().await;
        state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Make every publish fail until switched off
    pub fn fail_publishes(&self, fail: bool) {
        self.shared.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` polls (any consumer) fail
    pub fn fail_next_polls(&self, count: usize) {
        self.shared.fail_polls.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` commits (any consumer) fail
    pub fn fail_next_commits(&self, count: usize) {
        self.shared.fail_commits.store(count, Ordering::SeqCst);
    }
}

/// Decrement a failure budget, returning true if a failure should fire
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl LogClient for MemoryLog {
    async fn publish(&self, record: OutboundRecord) -> Result<DeliveryReceipt> {
        if self.shared.fail_publishes.load(Ordering::SeqCst) {
            return Err(EventError::Publish {
                topic: record.topic,
                reason: "broker unavailable".to_string(),
            });
        }

        let partition = self.partition_for(&record.key);
        let receipt = {
            let mut state = self.shared.state.lock().await;

            if self.shared.config.idempotent {
                if let Some(id) = record.dedup_id.as_deref() {
                    if let Some(existing) = state.dedup.get(id) {
                        tracing::debug!(
                            dedup_id = id,
                            partition = existing.partition,
                            offset = existing.offset,
                            "Duplicate publish suppressed"
                        );
                        return Ok(*existing);
                    }
                }
            }

            let partitions = state
                .topics
                .entry(record.topic.clone())
                .or_insert_with(|| {
                    (0..self.shared.config.partitions)
                        .map(|_| Vec::new())
                        .collect()
                });
            let records = &mut partitions[partition as usize];
            let receipt = DeliveryReceipt {
                partition,
                offset: records.len() as i64,
            };
            records.push(StoredRecord {
                key: record.key,
                payload: record.payload,
            });

            if self.shared.config.idempotent {
                if let Some(id) = record.dedup_id {
                    state.dedup.insert(id, receipt);
                }
            }
            receipt
        };

        self.shared.appended.send_modify(|n| *n += 1);
        Ok(receipt)
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        // Appends are acknowledged synchronously; nothing is buffered
        Ok(())
    }

    async fn consumer(&self, group_id: &str) -> Result<Box<dyn LogConsumer>> {
        Ok(Box::new(MemoryConsumer {
            log: self.clone(),
            group: group_id.to_string(),
            topic: None,
            positions: HashMap::new(),
            stored: HashMap::new(),
            next_partition: 0,
            appended: self.shared.appended.subscribe(),
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Consumer over a `MemoryLog`
///
/// Reads partitions round-robin. A fresh consumer starts each partition
/// at the group's committed offset (earliest when nothing was committed).
pub struct MemoryConsumer {
    log: MemoryLog,
    group: String,
    topic: Option<String>,

    /// partition → next offset to hand out
    positions: HashMap<i32, i64>,

    /// partition → offset recorded by `store_offset`
    stored: HashMap<i32, i64>,

    next_partition: usize,
    appended: watch::Receiver<u64>,
    closed: bool,
}

impl MemoryConsumer {
    async fn try_next(&mut self, topic: &str) -> Option<LogMessage> {
        let state = self.log.shared.state.lock().await;
        let partitions = state.topics.get(topic)?;
        let count = partitions.len();

        for i in 0..count {
            let partition = ((self.next_partition + i) % count) as i32;
            let position = self.positions.entry(partition).or_insert_with(|| {
                state
                    .committed
                    .get(&(self.group.clone(), topic.to_string(), partition))
                    .copied()
                    .unwrap_or(0)
            });

            if let Some(record) = partitions[partition as usize].get(*position as usize) {
                let message = LogMessage {
                    topic: topic.to_string(),
                    partition,
                    offset: *position,
                    key: Some(record.key.clone()),
                    payload: record.payload.clone(),
                };
                *position += 1;
                self.next_partition = partition as usize + 1;
                return Some(message);
            }
        }

        None
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(EventError::Consumer("consumer is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.ensure_open()?;
        self.topic = Some(topic.to_string());
        self.positions.clear();
        tracing::info!(group = %self.group, topic, "Memory consumer subscribed");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogMessage>> {
        self.ensure_open()?;
        let topic = self
            .topic
            .clone()
            .ok_or_else(|| EventError::Consumer("poll before subscribe".to_string()))?;

        if take_failure(&self.log.shared.fail_polls) {
            return Err(EventError::Consumer("injected poll failure".to_string()));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.appended.borrow_and_update();
            if let Some(message) = self.try_next(&topic).await {
                return Ok(Some(message));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match tokio::time::timeout(remaining, self.appended.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(None),
            }
        }
    }

    async fn store_offset(&mut self, message: &LogMessage) -> Result<()> {
        self.ensure_open()?;
        self.stored.insert(message.partition, message.offset + 1);
        Ok(())
    }

    /// Commits the offset recorded by `store_offset` for the message's
    /// partition; a message whose offset was never stored is rejected
    async fn commit(&mut self, message: &LogMessage) -> Result<()> {
        self.ensure_open()?;
        let stored = match self.stored.get(&message.partition) {
            Some(&next) if next > message.offset => next,
            _ => {
                return Err(EventError::Commit {
                    partition: message.partition,
                    offset: message.offset,
                    reason: "offset was not stored before commit".to_string(),
                })
            }
        };

        if take_failure(&self.log.shared.fail_commits) {
            return Err(EventError::Commit {
                partition: message.partition,
                offset: message.offset,
                reason: "injected commit failure".to_string(),
            });
        }

        let mut state = self.log.shared.state.lock().await;
        let next = state
            .committed
            .entry((self.group.clone(), message.topic.clone(), message.partition))
            .or_insert(0);
        *next = (*next).max(stored);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.topic = None;
            tracing::info!(group = %self.group, "Memory consumer closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, value: &str, dedup_id: Option<&str>) -> OutboundRecord {
        OutboundRecord {
            topic: "activity".to_string(),
            key: key.to_string(),
            payload: Bytes::from(value.to_string()),
            dedup_id: dedup_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_same_key_same_partition_increasing_offsets() {
        let log = MemoryLog::default();

        let first = log.publish(record("u1", "a", None)).await.unwrap();
        let second = log.publish(record("u1", "b", None)).await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(first.partition, log.partition_for("u1"));
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn test_dedup_id_suppresses_duplicate() {
        let log = MemoryLog::default();

        let first = log.publish(record("u1", "a", Some("evt-1"))).await.unwrap();
        let retry = log.publish(record("u1", "a", Some("evt-1"))).await.unwrap();

        assert_eq!(first, retry);
        assert_eq!(log.message_count("activity").await, 1);
    }

    #[tokio::test]
    async fn test_dedup_disabled_keeps_duplicates() {
        let log = MemoryLog::new(MemoryConfig {
            partitions: 1,
            idempotent: false,
        });

        log.publish(record("u1", "a", Some("evt-1"))).await.unwrap();
        log.publish(record("u1", "a", Some("evt-1"))).await.unwrap();

        assert_eq!(log.message_count("activity").await, 2);
    }

    #[tokio::test]
    async fn test_poll_timeout_returns_none() {
        let log = MemoryLog::default();
        let mut consumer = log.consumer("g").await.unwrap();
        consumer.subscribe("activity").await.unwrap();

        let polled = consumer.poll(Duration::from_millis(20)).await.unwrap();
        assert!(polled.is_none());
    }

    #[tokio::test]
    async fn test_poll_before_subscribe_fails() {
        let log = MemoryLog::default();
        let mut consumer = log.consumer("g").await.unwrap();

        assert!(consumer.poll(Duration::from_millis(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let log = MemoryLog::default();
        let mut consumer = log.consumer("g").await.unwrap();
        consumer.subscribe("activity").await.unwrap();

        let publisher = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(record("u1", "late", None)).await.unwrap();
        });

        let message = consumer.poll(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(&message.payload[..], b"late");
        assert_eq!(message.key.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_uncommitted_messages_are_redelivered_to_group() {
        let log = MemoryLog::new(MemoryConfig {
            partitions: 1,
            idempotent: true,
        });
        log.publish(record("u1", "a", None)).await.unwrap();
        log.publish(record("u1", "b", None)).await.unwrap();

        let mut first = log.consumer("g").await.unwrap();
        first.subscribe("activity").await.unwrap();
        let a = first.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        first.store_offset(&a).await.unwrap();
        first.commit(&a).await.unwrap();
        let b = first.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(&b.payload[..], b"b");
        // Crash before committing b
        first.close().await.unwrap();

        assert_eq!(log.committed_offset("g", "activity", 0).await, Some(1));

        let mut second = log.consumer("g").await.unwrap();
        second.subscribe("activity").await.unwrap();
        let again = second.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(again.offset, 1);
        assert_eq!(&again.payload[..], b"b");
    }

    #[tokio::test]
    async fn test_groups_track_offsets_independently() {
        let log = MemoryLog::default();
        log.publish(record("u1", "a", None)).await.unwrap();

        let mut g1 = log.consumer("g1").await.unwrap();
        g1.subscribe("activity").await.unwrap();
        let m = g1.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        g1.store_offset(&m).await.unwrap();
        g1.commit(&m).await.unwrap();

        let mut g2 = log.consumer("g2").await.unwrap();
        g2.subscribe("activity").await.unwrap();
        assert!(g2.poll(Duration::from_millis(50)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let log = MemoryLog::default();

        log.fail_publishes(true);
        assert!(log.publish(record("u1", "a", None)).await.is_err());
        log.fail_publishes(false);
        log.publish(record("u1", "a", None)).await.unwrap();

        let mut consumer = log.consumer("g").await.unwrap();
        consumer.subscribe("activity").await.unwrap();

        log.fail_next_polls(1);
        assert!(consumer.poll(Duration::from_millis(10)).await.is_err());
        let message = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        consumer.store_offset(&message).await.unwrap();

        log.fail_next_commits(1);
        assert!(matches!(
            consumer.commit(&message).await,
            Err(EventError::Commit { .. })
        ));
        consumer.commit(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_uses_stored_offset() {
        let log = MemoryLog::new(MemoryConfig {
            partitions: 1,
            idempotent: true,
        });
        log.publish(record("u1", "a", None)).await.unwrap();
        log.publish(record("u1", "b", None)).await.unwrap();

        let mut consumer = log.consumer("g").await.unwrap();
        consumer.subscribe("activity").await.unwrap();
        let a = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();

        assert!(matches!(
            consumer.commit(&a).await,
            Err(EventError::Commit { .. })
        ));
        assert_eq!(log.committed_offset("g", "activity", 0).await, None);

        consumer.store_offset(&a).await.unwrap();
        consumer.commit(&a).await.unwrap();
        assert_eq!(log.committed_offset("g", "activity", 0).await, Some(1));

        // b was polled but only a's offset is stored
        let b = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert!(consumer.commit(&b).await.is_err());
        assert_eq!(log.committed_offset("g", "activity", 0).await, Some(1));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let log = MemoryLog::default();
        let mut consumer = log.consumer("g").await.unwrap();
        consumer.subscribe("activity").await.unwrap();

        consumer.close().await.unwrap();
        consumer.close().await.unwrap();
        assert!(consumer.poll(Duration::from_millis(1)).await.is_err());
    }
}

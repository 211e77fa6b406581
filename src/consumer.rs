//! Event consumer: the pull/apply/commit loop feeding the store
//!
//! This loop is the only place delivery semantics are decided:
//!
//! - every polled message is committed before the next poll, whatever
//!   happened to it;
//! - a payload that does not decode is logged, committed and dropped
//!   for good (poison message);
//! - a crash between the store append and the commit redelivers the
//!   message on restart, and the store keeps both copies.
//!
//! Delivery is therefore at-least-once for well-formed events and
//! at-most-once for anything that fails to process.

use crate::config::ConsumerSettings;
use crate::error::Result;
use crate::provider::{LogClient, LogConsumer};
use crate::store::EventStore;
use crate::types::{ActivityEvent, LogMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of the consume loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Subscribing,
    Polling,
    Processing,
    Committing,
    Closing,
}

/// What a single loop iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Event decoded and appended to the store
    Processed {
        event_id: String,
        partition: i32,
        offset: i64,
    },
    /// Message dropped without touching the store (offset still committed)
    Skipped { reason: String },
    /// Poll or commit failed; the loop carries on after the normal pause
    TransientError { reason: String },
    /// Poll wait elapsed with no message
    Idle,
}

/// Counters of loop outcomes
#[derive(Debug, Default)]
pub struct ConsumerStats {
    processed: AtomicU64,
    skipped: AtomicU64,
    transient_errors: AtomicU64,
}

impl ConsumerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn transient_errors(&self) -> u64 {
        self.transient_errors.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &ProcessOutcome) {
        let counter = match outcome {
            ProcessOutcome::Processed { .. } => &self.processed,
            ProcessOutcome::Skipped { .. } => &self.skipped,
            ProcessOutcome::TransientError { .. } => &self.transient_errors,
            ProcessOutcome::Idle => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Consumes the activity topic into an `EventStore`
///
/// Run exactly one per process; it is the store's only writer.
pub struct EventConsumer {
    client: Arc<dyn LogClient>,
    store: Arc<EventStore>,
    topic: String,
    group_id: String,
    settings: ConsumerSettings,
    state: watch::Sender<ConsumerState>,
    stats: Arc<ConsumerStats>,
}

impl EventConsumer {
    /// Create a consumer for `topic` in consumer group `group_id`
    pub fn new(
        client: Arc<dyn LogClient>,
        store: Arc<EventStore>,
        topic: impl Into<String>,
        group_id: impl Into<String>,
        settings: ConsumerSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Stopped);
        Self {
            client,
            store,
            topic: topic.into(),
            group_id: group_id.into(),
            settings,
            state,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Watch the loop's state transitions
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Shared outcome counters
    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Run the loop on a background task until `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run the loop until `shutdown` is cancelled
    ///
    /// Fails only if the initial subscribe fails. The log consumer is closed
    /// on every exit path.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.set_state(ConsumerState::Subscribing);
        let mut consumer = match self.client.consumer(&self.group_id).await {
            Ok(consumer) => consumer,
            Err(e) => {
                self.set_state(ConsumerState::Stopped);
                return Err(e);
            }
        };

        if let Err(e) = consumer.subscribe(&self.topic).await {
            tracing::error!(topic = %self.topic, error = %e, "Subscribe failed");
            self.close(consumer.as_mut()).await;
            return Err(e);
        }

        tracing::info!(
            topic = %self.topic,
            group = %self.group_id,
            provider = self.client.name(),
            "Event consumer started"
        );

        let poll_interval = self.settings.poll_interval();
        while !shutdown.is_cancelled() {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = self.poll_once(consumer.as_mut()) => outcome,
            };
            self.stats.record(&outcome);

            if let ProcessOutcome::TransientError { reason } = &outcome {
                tracing::error!(topic = %self.topic, error = %reason, "Error in consumer loop");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        self.close(consumer.as_mut()).await;
        Ok(())
    }

    /// One iteration: poll, apply, commit
    ///
    /// The offset is committed whether the message was stored or skipped.
    pub async fn poll_once(&self, consumer: &mut dyn LogConsumer) -> ProcessOutcome {
        self.set_state(ConsumerState::Polling);
        let message = match consumer.poll(self.settings.poll_timeout()).await {
            Ok(Some(message)) => message,
            Ok(None) => return ProcessOutcome::Idle,
            Err(e) => {
                return ProcessOutcome::TransientError {
                    reason: e.to_string(),
                }
            }
        };

        self.set_state(ConsumerState::Processing);
        let outcome = self.process_message(&message);

        self.set_state(ConsumerState::Committing);
        if let Err(e) = commit(consumer, &message).await {
            // The event (if any) is already in the store; redelivery will duplicate it
            return ProcessOutcome::TransientError {
                reason: e.to_string(),
            };
        }

        outcome
    }

    /// Decode a message and append it to the store
    ///
    /// Never fails: undecodable payloads come back as `Skipped`.
    pub fn process_message(&self, message: &LogMessage) -> ProcessOutcome {
        let event = match ActivityEvent::from_payload(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Unprocessable message dropped"
                );
                return ProcessOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let event_id = event.id.clone();
        tracing::info!(
            event_id = %event_id,
            event_type = %event.event_type,
            user_id = %event.user_id,
            partition = message.partition,
            offset = message.offset,
            "Processed event"
        );
        self.store.add(event);

        ProcessOutcome::Processed {
            event_id,
            partition: message.partition,
            offset: message.offset,
        }
    }

    async fn close(&self, consumer: &mut dyn LogConsumer) {
        self.set_state(ConsumerState::Closing);
        if let Err(e) = consumer.close().await {
            tracing::warn!(error = %e, "Failed to close log consumer");
        }
        self.set_state(ConsumerState::Stopped);
        tracing::info!(topic = %self.topic, "Event consumer stopped");
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}

async fn commit(consumer: &mut dyn LogConsumer, message: &LogMessage) -> Result<()> {
    consumer.store_offset(message).await?;
    consumer.commit(message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::{MemoryConfig, MemoryLog};
    use crate::types::OutboundRecord;
    use bytes::Bytes;
    use std::time::Duration;

    const TOPIC: &str = "activity";

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            poll_timeout_ms: 50,
            poll_interval_ms: 5,
        }
    }

    fn single_partition_log() -> MemoryLog {
        MemoryLog::new(MemoryConfig {
            partitions: 1,
            idempotent: true,
        })
    }

    fn consumer_for(log: &MemoryLog, store: Arc<EventStore>) -> EventConsumer {
        EventConsumer::new(Arc::new(log.clone()), store, TOPIC, "g", settings())
    }

    async fn publish_raw(log: &MemoryLog, key: &str, payload: &[u8]) {
        log.publish(OutboundRecord {
            topic: TOPIC.to_string(),
            key: key.to_string(),
            payload: Bytes::copy_from_slice(payload),
            dedup_id: None,
        })
        .await
        .unwrap();
    }

    async fn publish_event(log: &MemoryLog, event: &ActivityEvent) {
        publish_raw(log, &event.user_id, &event.to_payload().unwrap()).await;
    }

    async fn subscribed(log: &MemoryLog) -> Box<dyn LogConsumer> {
        let mut consumer = log.consumer("g").await.unwrap();
        consumer.subscribe(TOPIC).await.unwrap();
        consumer
    }

    #[tokio::test]
    async fn test_process_valid_message() {
        let log = single_partition_log();
        let store = Arc::new(EventStore::new());
        let consumer = consumer_for(&log, store.clone());
        let event = ActivityEvent::new("u1", "login");
        publish_event(&log, &event).await;

        let mut log_consumer = subscribed(&log).await;
        let outcome = consumer.poll_once(log_consumer.as_mut()).await;

        assert_eq!(
            outcome,
            ProcessOutcome::Processed {
                event_id: event.id.clone(),
                partition: 0,
                offset: 0,
            }
        );
        assert_eq!(store.by_user("u1").len(), 1);
        assert_eq!(log.committed_offset("g", TOPIC, 0).await, Some(1));
    }

    #[tokio::test]
    async fn test_poison_message_is_skipped_and_committed() {
        let log = single_partition_log();
        let store = Arc::new(EventStore::new());
        let consumer = consumer_for(&log, store.clone());
        publish_raw(&log, "u1", b"{not json").await;
        let good = ActivityEvent::new("u1", "login");
        publish_event(&log, &good).await;

        let mut log_consumer = subscribed(&log).await;

        let first = consumer.poll_once(log_consumer.as_mut()).await;
        assert!(matches!(first, ProcessOutcome::Skipped { .. }));
        assert!(store.is_empty());
        assert_eq!(log.committed_offset("g", TOPIC, 0).await, Some(1));

        let second = consumer.poll_once(log_consumer.as_mut()).await;
        assert!(matches!(second, ProcessOutcome::Processed { .. }));
        assert_eq!(store.all()[0].id, good.id);
        assert_eq!(log.committed_offset("g", TOPIC, 0).await, Some(2));
    }

    #[tokio::test]
    async fn test_idle_poll() {
        let log = single_partition_log();
        let consumer = consumer_for(&log, Arc::new(EventStore::new()));
        let mut log_consumer = subscribed(&log).await;

        assert_eq!(consumer.poll_once(log_consumer.as_mut()).await, ProcessOutcome::Idle);
    }

    #[tokio::test]
    async fn test_poll_error_is_transient() {
        let log = single_partition_log();
        let consumer = consumer_for(&log, Arc::new(EventStore::new()));
        let mut log_consumer = subscribed(&log).await;

        log.fail_next_polls(1);
        let outcome = consumer.poll_once(log_consumer.as_mut()).await;
        assert!(matches!(outcome, ProcessOutcome::TransientError { .. }));
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_stored_event() {
        let log = single_partition_log();
        let store = Arc::new(EventStore::new());
        let consumer = consumer_for(&log, store.clone());
        publish_event(&log, &ActivityEvent::new("u1", "login")).await;
        let mut log_consumer = subscribed(&log).await;

        log.fail_next_commits(1);
        let outcome = consumer.poll_once(log_consumer.as_mut()).await;

        assert!(matches!(outcome, ProcessOutcome::TransientError { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(log.committed_offset("g", TOPIC, 0).await, None);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let log = single_partition_log();
        let store = Arc::new(EventStore::new());
        let consumer = consumer_for(&log, store.clone());
        let stats = consumer.stats();
        let mut state = consumer.state();

        let shutdown = CancellationToken::new();
        let handle = consumer.spawn(shutdown.clone());

        publish_raw(&log, "u1", b"garbage").await;
        publish_event(&log, &ActivityEvent::new("u1", "login")).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.processed() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*state.borrow_and_update(), ConsumerState::Stopped);
        assert_eq!(stats.processed(), 1);
        assert_eq!(stats.skipped(), 1);
        assert_eq!(stats.transient_errors(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_long_poll() {
        let log = single_partition_log();
        let consumer = EventConsumer::new(
            Arc::new(log.clone()),
            Arc::new(EventStore::new()),
            TOPIC,
            "g",
            ConsumerSettings {
                poll_timeout_ms: 60_000,
                poll_interval_ms: 60_000,
            },
        );
        let mut state = consumer.state();
        let shutdown = CancellationToken::new();
        let handle = consumer.spawn(shutdown.clone());

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConsumerState::Polling),
        )
        .await
        .unwrap()
        .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(*state.borrow(), ConsumerState::Stopped);
    }
}

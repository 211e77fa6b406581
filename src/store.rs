//! In-memory read model of consumed events
//!
//! `EventStore` is an append-only multiset: events are never updated,
//! deduplicated or evicted, so it grows for the lifetime of the process.
//! The log is the source of truth; this is a query cache over it.

use crate::types::ActivityEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Concurrent append-only event store
///
/// Events are bucketed per user in a sharded map (DashMap per-key locking),
/// so an append only locks the shard holding that user and readers of other
/// shards proceed untouched. Query results are snapshots of `Arc` handles,
/// not copies of the events.
#[derive(Default)]
pub struct EventStore {
    /// user_id → events in consumption order
    by_user: DashMap<String, Vec<Arc<ActivityEvent>>>,

    /// Total appended events
    len: AtomicUsize,
}

impl EventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event; it becomes visible to subsequent queries
    pub fn add(&self, event: ActivityEvent) {
        let event = Arc::new(event);
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            user_id = %event.user_id,
            "Event stored"
        );

        self.by_user
            .entry(event.user_id.clone())
            .or_default()
            .push(event);
        self.len.fetch_add(1, Ordering::Release);
    }

    /// Every stored event, in no particular order
    pub fn all(&self) -> Vec<Arc<ActivityEvent>> {
        let mut events = Vec::with_capacity(self.len());
        for bucket in self.by_user.iter() {
            events.extend(bucket.value().iter().cloned());
        }
        events
    }

    /// Events whose user id matches exactly
    pub fn by_user(&self, user_id: &str) -> Vec<Arc<ActivityEvent>> {
        self.by_user
            .get(user_id)
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    /// Events whose type matches, ignoring case (full Unicode lowercase)
    pub fn by_type(&self, event_type: &str) -> Vec<Arc<ActivityEvent>> {
        let wanted = event_type.to_lowercase();
        let mut events = Vec::new();
        for bucket in self.by_user.iter() {
            events.extend(
                bucket
                    .value()
                    .iter()
                    .filter(|e| e.event_type.to_lowercase() == wanted)
                    .cloned(),
            );
        }
        events
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True when nothing has been stored yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sort events by timestamp, newest first, for presentation
pub fn sort_newest_first(events: &mut [Arc<ActivityEvent>]) {
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

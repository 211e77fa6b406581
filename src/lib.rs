//! # a3s-activity
//!
//! User-activity event pipeline for the A3S ecosystem.
//!
//! ## Overview
//!
//! Events arrive over HTTP, are published onto a durable log topic keyed by
//! user id, and are consumed asynchronously into an in-memory store that
//! serves queries. Publish and store are decoupled by the log, so readers
//! get an eventually-consistent, at-least-once view of published events.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_activity::{ActivityEvent, ConsumerSettings, EventConsumer, EventProducer, EventStore};
//! use a3s_activity::provider::memory::MemoryLog;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> a3s_activity::Result<()> {
//! let log = Arc::new(MemoryLog::default());
//! let store = Arc::new(EventStore::new());
//!
//! let producer = EventProducer::new(log.clone(), "user-activity-events", Default::default());
//! let consumer = EventConsumer::new(
//!     log,
//!     store.clone(),
//!     "user-activity-events",
//!     "event-processor-group",
//!     ConsumerSettings::default(),
//! );
//!
//! let shutdown = CancellationToken::new();
//! let handle = consumer.spawn(shutdown.clone());
//!
//! let receipt = producer.publish(&ActivityEvent::new("u1", "login")).await?;
//! println!("partition {} offset {}", receipt.partition, receipt.offset);
//!
//! shutdown.cancel();
//! let _ = handle.await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Log providers
//!
//! - **memory**: in-process partitioned log for tests and single-process use
//! - **nats**: NATS JetStream for durable, distributed streaming
//! - **kafka**: Apache Kafka via librdkafka (`kafka` feature, on by default)
//!
//! ## Architecture
//!
//! - **LogClient** / **LogConsumer** traits: the log system seam
//! - **EventProducer**: keyed, acked, bounded-in-flight publish
//! - **EventConsumer**: poll → apply → commit loop with explicit outcomes
//! - **EventStore**: concurrent append-only read model
//! - **api**: axum routes over producer and store

pub mod api;
pub mod config;
pub mod consumer;
pub mod error;
pub mod pipeline;
pub mod producer;
pub mod provider;
pub mod store;
pub mod types;

// Re-export core types
pub use config::{
    AckLevel, ApiConfig, Config, ConsumerSettings, LogConfig, LogProviderKind, ProducerSettings,
};
pub use consumer::{ConsumerState, ConsumerStats, EventConsumer, ProcessOutcome};
pub use error::{EventError, Result};
pub use pipeline::Pipeline;
pub use producer::EventProducer;
pub use provider::{LogClient, LogConsumer};
pub use store::{sort_newest_first, EventStore};
pub use types::{ActivityEvent, DeliveryReceipt, LogMessage, OutboundRecord};

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryLog};
pub use provider::nats::{NatsConfig, NatsLog, StorageType};
#[cfg(feature = "kafka")]
pub use provider::kafka::{KafkaConfig, KafkaLog};

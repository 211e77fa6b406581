//! NATS JetStream log provider
//!
//! Implements `LogClient` on NATS JetStream: one stream per topic,
//! durable pull consumers per group, explicit acks as offset commits.

mod client;
mod config;
mod subscriber;

pub use client::NatsClient;
pub use config::{NatsConfig, StorageType};
pub use subscriber::NatsConsumer;

use crate::error::Result;
use crate::provider::{LogClient, LogConsumer};
use crate::types::{DeliveryReceipt, OutboundRecord};
use async_trait::async_trait;
use std::time::Duration;

/// NATS JetStream log
///
/// Wraps `NatsClient` and implements the `LogClient` trait.
pub struct NatsLog {
    client: NatsClient,
}

impl NatsLog {
    /// Connect to NATS and initialize the JetStream stream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl LogClient for NatsLog {
    async fn publish(&self, record: OutboundRecord) -> Result<DeliveryReceipt> {
        self.client.publish(record).await
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        self.client.flush(timeout).await
    }

    async fn consumer(&self, group_id: &str) -> Result<Box<dyn LogConsumer>> {
        Ok(Box::new(NatsConsumer::new(
            self.client.jetstream().clone(),
            self.client.config().stream_name.clone(),
            group_id.to_string(),
        )))
    }

    fn name(&self) -> &str {
        "nats"
    }
}

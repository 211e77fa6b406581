//! NATS JetStream client: connect, ensure stream, publish

use super::config::NatsConfig;
use crate::error::{EventError, Result};
use crate::types::{DeliveryReceipt, OutboundRecord};
use async_nats::jetstream;
use std::time::Duration;

/// Header carrying the partition key
pub(crate) const KEY_HEADER: &str = "Activity-Key";

/// Header JetStream uses for publish deduplication
const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Connection to a NATS server plus the JetStream stream holding the topic
pub struct NatsClient {
    connection: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Open the connection, then create the stream if it is missing
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let servers = config.server_list();
        let connection = connect_options(&config)
            .connect(servers.as_str())
            .await
            .map_err(|e| EventError::Connection(format!("{}: {}", servers, e)))?;

        tracing::info!(servers = %servers, "Connected to NATS");

        let jetstream = jetstream::new(connection.clone());
        ensure_stream(&jetstream, &config).await?;

        Ok(Self {
            connection,
            jetstream,
            config,
        })
    }

    /// Publish a record and wait for the stream's ack
    ///
    /// JetStream has a single ordered sequence per stream, so the receipt
    /// always reports partition 0 and the stream sequence as the offset.
    pub async fn publish(&self, record: OutboundRecord) -> Result<DeliveryReceipt> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(KEY_HEADER, record.key.as_str());
        if let Some(ref dedup_id) = record.dedup_id {
            headers.insert(MSG_ID_HEADER, dedup_id.as_str());
        }

        let ack = self
            .jetstream
            .publish_with_headers(record.topic.clone(), headers, record.payload)
            .await
            .map_err(|e| EventError::Publish {
                topic: record.topic.clone(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| EventError::Publish {
                topic: record.topic.clone(),
                reason: format!("ack failed: {}", e),
            })?;

        if ack.duplicate {
            tracing::debug!(
                dedup_id = ?record.dedup_id,
                sequence = ack.sequence,
                "Duplicate publish suppressed by JetStream"
            );
        }

        Ok(DeliveryReceipt {
            partition: 0,
            offset: ack.sequence as i64,
        })
    }

    /// Flush the connection's outgoing buffer
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.connection.flush())
            .await
            .map_err(|_| EventError::Timeout(format!("NATS flush exceeded {:?}", timeout)))?
            .map_err(|e| EventError::Connection(format!("NATS flush failed: {}", e)))
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

fn connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .name("a3s-activity")
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Create the stream bound to the topic subject, or reuse the existing one
async fn ensure_stream(js: &jetstream::Context, config: &NatsConfig) -> Result<()> {
    let stream = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: vec![config.topic.clone()],
        storage: config.storage.into(),
        max_age: Duration::from_secs(config.max_age_secs),
        duplicate_window: Duration::from_secs(config.duplicate_window_secs),
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    js.get_or_create_stream(stream).await.map_err(|e| {
        EventError::Stream(format!("stream '{}' unavailable: {}", config.stream_name, e))
    })?;

    tracing::info!(stream = %config.stream_name, topic = %config.topic, "Stream bound to topic");

    Ok(())
}

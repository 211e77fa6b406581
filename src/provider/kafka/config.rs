//! Kafka log configuration

use crate::config::{AckLevel, LogConfig, ProducerSettings};
use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Producer and consumer settings handed to librdkafka
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaConfig {
    /// Broker addresses (`host:port`)
    pub brokers: Vec<String>,

    /// Requested acknowledgement level
    #[serde(default)]
    pub acks: AckLevel,

    /// Broker-side idempotent producer (no duplicates from client retries)
    pub enable_idempotence: bool,

    /// `max.in.flight.requests.per.connection`
    pub max_in_flight: usize,

    /// Delivery deadline of a single message, retries included
    pub message_timeout_ms: u64,

    /// Consumer group session timeout
    pub session_timeout_ms: u64,

    /// Bound on the broker reachability check done at connect
    pub metadata_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            acks: AckLevel::Leader,
            enable_idempotence: true,
            max_in_flight: 5,
            message_timeout_ms: 10_000,
            session_timeout_ms: 30_000,
            metadata_timeout_ms: 5_000,
        }
    }
}

impl KafkaConfig {
    /// Derive Kafka settings from the pipeline's log and producer configuration
    pub fn from_settings(log: &LogConfig, producer: &ProducerSettings) -> Self {
        Self {
            brokers: log.bootstrap_servers.clone(),
            acks: producer.acks,
            enable_idempotence: producer.idempotent,
            max_in_flight: producer.max_in_flight,
            message_timeout_ms: producer.publish_timeout_ms,
            ..Default::default()
        }
    }

    /// Comma-separated `bootstrap.servers` value
    pub fn broker_list(&self) -> String {
        self.brokers.join(",")
    }

    /// The `acks` value actually sent to librdkafka
    ///
    /// librdkafka refuses to build an idempotent producer with anything
    /// but `acks=all`, so idempotence overrides a leader-only request.
    pub fn effective_acks(&self) -> &'static str {
        match (self.enable_idempotence, self.acks) {
            (true, _) | (false, AckLevel::All) => "all",
            (false, AckLevel::Leader) => "1",
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub(crate) fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.broker_list())
            .set("acks", self.effective_acks())
            .set("enable.idempotence", self.enable_idempotence.to_string())
            .set(
                "max.in.flight.requests.per.connection",
                self.max_in_flight.to_string(),
            )
            .set("message.timeout.ms", self.message_timeout_ms.to_string());
        config
    }

    /// Manual offset management: nothing is stored or committed behind the
    /// consume loop's back
    pub(crate) fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.broker_list())
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string());
        config
    }
}

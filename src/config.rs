//! Pipeline configuration
//!
//! Loaded once at process start from `ACTIVITY_*` environment variables
//! (a `.env` file is honoured) and immutable afterwards.

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Broker list used for Kafka when none is configured
const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Log system connection and topic
    #[serde(default)]
    pub log: LogConfig,

    /// Publish behaviour
    #[serde(default)]
    pub producer: ProducerSettings,

    /// Consume loop behaviour
    #[serde(default)]
    pub consumer: ConsumerSettings,

    /// HTTP listener
    #[serde(default)]
    pub api: ApiConfig,
}

/// Which log backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogProviderKind {
    /// In-process partitioned log, lost on exit
    Memory,
    /// NATS JetStream
    #[default]
    Nats,
    /// Apache Kafka (requires the `kafka` feature)
    Kafka,
}

impl FromStr for LogProviderKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "nats" | "jetstream" => Ok(Self::Nats),
            "kafka" => Ok(Self::Kafka),
            other => Err(EventError::Config(format!(
                "Invalid log provider: {}. Expected: memory, nats, kafka",
                other
            ))),
        }
    }
}

/// Log system connection and topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Backend selection
    #[serde(default)]
    pub provider: LogProviderKind,

    /// Bootstrap server addresses
    pub bootstrap_servers: Vec<String>,

    /// Topic events are published to and consumed from
    pub topic: String,

    /// Consumer group id; committed offsets are tracked per group
    pub group_id: String,

    /// JetStream stream backing the topic (NATS only)
    pub stream_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            provider: LogProviderKind::default(),
            bootstrap_servers: vec!["nats://127.0.0.1:4222".to_string()],
            topic: "user-activity-events".to_string(),
            group_id: "event-processor-group".to_string(),
            stream_name: "USER_ACTIVITY".to_string(),
        }
    }
}

/// Which replicas must have a write before the publish is acknowledged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckLevel {
    /// Partition leader only; a leader failure right after the ack can lose the write
    #[default]
    Leader,
    /// Every in-sync replica
    All,
}

impl FromStr for AckLevel {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "leader" | "1" => Ok(Self::Leader),
            "all" | "-1" => Ok(Self::All),
            other => Err(EventError::Config(format!(
                "Invalid ack level: {}. Expected: leader, all",
                other
            ))),
        }
    }
}

/// Publish behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSettings {
    /// Upper bound on a single publish, ack included
    pub publish_timeout_ms: u64,

    /// Maximum unacknowledged publishes in flight
    pub max_in_flight: usize,

    /// Acknowledgement level requested from brokers that support one
    #[serde(default)]
    pub acks: AckLevel,

    /// Attach the event id as a dedup id so client retries don't duplicate
    pub idempotent: bool,

    /// Upper bound on the shutdown flush
    pub flush_timeout_ms: u64,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            publish_timeout_ms: 10_000,
            max_in_flight: 5,
            acks: AckLevel::Leader,
            idempotent: true,
            flush_timeout_ms: 10_000,
        }
    }
}

impl ProducerSettings {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// Consume loop behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSettings {
    /// Bounded wait of a single poll
    pub poll_timeout_ms: u64,

    /// Fixed pause between loop iterations
    pub poll_interval_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1_000,
            poll_interval_ms: 100,
        }
    }
}

impl ConsumerSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ApiConfig {
    /// `host:port` string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup over the defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("ACTIVITY_LOG_PROVIDER") {
            config.log.provider = v.parse()?;
        }
        if let Some(v) = lookup("ACTIVITY_BOOTSTRAP_SERVERS") {
            let servers: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if servers.is_empty() {
                return Err(EventError::Config(
                    "ACTIVITY_BOOTSTRAP_SERVERS must list at least one address".to_string(),
                ));
            }
            config.log.bootstrap_servers = servers;
        } else if config.log.provider == LogProviderKind::Kafka {
            config.log.bootstrap_servers = vec![DEFAULT_KAFKA_BROKERS.to_string()];
        }
        if let Some(v) = lookup("ACTIVITY_TOPIC") {
            config.log.topic = non_empty("ACTIVITY_TOPIC", v)?;
        }
        if let Some(v) = lookup("ACTIVITY_GROUP_ID") {
            config.log.group_id = non_empty("ACTIVITY_GROUP_ID", v)?;
        }
        if let Some(v) = lookup("ACTIVITY_STREAM_NAME") {
            config.log.stream_name = non_empty("ACTIVITY_STREAM_NAME", v)?;
        }
        if let Some(v) = lookup("ACTIVITY_PUBLISH_TIMEOUT_MS") {
            config.producer.publish_timeout_ms = parse("ACTIVITY_PUBLISH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ACTIVITY_MAX_IN_FLIGHT") {
            let max: usize = parse("ACTIVITY_MAX_IN_FLIGHT", &v)?;
            if max == 0 {
                return Err(EventError::Config(
                    "ACTIVITY_MAX_IN_FLIGHT must be at least 1".to_string(),
                ));
            }
            config.producer.max_in_flight = max;
        }
        if let Some(v) = lookup("ACTIVITY_PRODUCER_ACKS") {
            config.producer.acks = v.parse()?;
        }
        if let Some(v) = lookup("ACTIVITY_PRODUCER_IDEMPOTENT") {
            config.producer.idempotent = parse("ACTIVITY_PRODUCER_IDEMPOTENT", &v)?;
        }
        if let Some(v) = lookup("ACTIVITY_POLL_TIMEOUT_MS") {
            config.consumer.poll_timeout_ms = parse("ACTIVITY_POLL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("ACTIVITY_POLL_INTERVAL_MS") {
            config.consumer.poll_interval_ms = parse("ACTIVITY_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("ACTIVITY_API_HOST") {
            config.api.host = non_empty("ACTIVITY_API_HOST", v)?;
        }
        if let Some(v) = lookup("ACTIVITY_API_PORT") {
            config.api.port = parse("ACTIVITY_API_PORT", &v)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EventError::Config(format!("Invalid {}: {}", key, value)))
}

fn non_empty(key: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(EventError::Config(format!("{} must not be empty", key)));
    }
    Ok(value)
}

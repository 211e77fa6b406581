//! NATS JetStream log configuration

use crate::config::LogConfig;
use serde::{Deserialize, Serialize};

/// Storage backend for the JetStream stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Persist messages on disk
    #[default]
    File,
    /// Keep messages in server memory
    Memory,
}

impl From<StorageType> for async_nats::jetstream::stream::StorageType {
    fn from(storage: StorageType) -> Self {
        match storage {
            StorageType::File => Self::File,
            StorageType::Memory => Self::Memory,
        }
    }
}

/// Connection and stream settings for the NATS log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsConfig {
    /// Server URLs (`nats://host:port`)
    pub servers: Vec<String>,

    /// JetStream stream that holds the topic
    pub stream_name: String,

    /// Subject the stream captures (the topic name)
    pub topic: String,

    /// Stream storage backend
    #[serde(default)]
    pub storage: StorageType,

    /// Maximum message age in seconds (0 = unlimited)
    #[serde(default)]
    pub max_age_secs: u64,

    /// Window in which a repeated `Nats-Msg-Id` is discarded
    pub duplicate_window_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Optional auth token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://127.0.0.1:4222".to_string()],
            stream_name: "USER_ACTIVITY".to_string(),
            topic: "user-activity-events".to_string(),
            storage: StorageType::File,
            max_age_secs: 0,
            duplicate_window_secs: 120,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            token: None,
        }
    }
}

impl NatsConfig {
    /// Derive NATS settings from the pipeline's log configuration
    pub fn from_log_config(log: &LogConfig) -> Self {
        Self {
            servers: log.bootstrap_servers.clone(),
            stream_name: log.stream_name.clone(),
            topic: log.topic.clone(),
            ..Default::default()
        }
    }

    /// Comma-separated server list as accepted by `async_nats::connect`
    pub fn server_list(&self) -> String {
        self.servers.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_log_config() {
        let log = LogConfig {
            bootstrap_servers: vec!["nats://a:4222".to_string(), "nats://b:4222".to_string()],
            topic: "clicks".to_string(),
            stream_name: "CLICKS".to_string(),
            ..Default::default()
        };

        let config = NatsConfig::from_log_config(&log);
        assert_eq!(config.topic, "clicks");
        assert_eq!(config.stream_name, "CLICKS");
        assert_eq!(config.server_list(), "nats://a:4222,nats://b:4222");
        assert_eq!(config.storage, StorageType::File);
        assert!(config.duplicate_window_secs > 0);
    }
}

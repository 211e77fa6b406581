//! Error types for a3s-activity

use thiserror::Error;

/// Errors that can occur in the activity pipeline
#[derive(Debug, Error)]
pub enum EventError {
    /// Log system connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failure (broker unreachable, rejected, ack failed)
    #[error("Failed to publish event to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe {
        topic: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stream/topic creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer creation, poll, or lifecycle error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Offset commit failure
    #[error("Failed to commit offset {offset} on partition {partition}: {reason}")]
    Commit {
        partition: i32,
        offset: i64,
        reason: String,
    },

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected input (missing user id or event type)
    #[error("Invalid event: {0}")]
    Validation(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EventError>;

//! Core event types for the activity pipeline
//!
//! All types use camelCase JSON serialization for wire compatibility.

use crate::error::{EventError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// A single user-activity event
///
/// Events are immutable once published. The `user_id` doubles as the log
/// partition key, so all events of one user stay in publish order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Unique event identifier (evt-<uuid>), generated when absent
    #[serde(default = "generate_event_id", alias = "eventId")]
    pub id: String,

    /// Originating user (`null` reads as blank)
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user_id: String,

    /// Event category (e.g., "login", "page_view"), matched case-insensitively
    #[serde(default, deserialize_with = "null_as_empty")]
    pub event_type: String,

    /// Creation time in UTC
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional key-value metadata, opaque to the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ActivityEvent {
    /// Create a new event with auto-generated id and timestamp
    pub fn new(user_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: generate_event_id(),
            user_id: user_id.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Reject events without a user id or event type
    ///
    /// Only the HTTP boundary calls this; the producer and consumer
    /// pass events through unchecked.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(EventError::Validation("userId is required".to_string()));
        }
        if self.event_type.trim().is_empty() {
            return Err(EventError::Validation("eventType is required".to_string()));
        }
        Ok(())
    }

    /// Serialize to the JSON wire payload
    pub fn to_payload(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Deserialize from a JSON wire payload
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

fn generate_event_id() -> String {
    format!("evt-{}", uuid::Uuid::new_v4())
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Log coordinates assigned to a published record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Partition index
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,
}

/// A record handed to the log client for publishing
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    /// Destination topic
    pub topic: String,

    /// Partition key
    pub key: String,

    /// Serialized value
    pub payload: Bytes,

    /// Producer-side deduplication id; retries carrying the same id
    /// must not create a second log entry
    pub dedup_id: Option<String>,
}

/// A message pulled from the log, the consumer's unit of acknowledgement
#[derive(Debug, Clone)]
pub struct LogMessage {
    /// Topic the message was read from
    pub topic: String,

    /// Partition index
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Partition key, if the record had one
    pub key: Option<String>,

    /// Raw value
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = ActivityEvent::new("u1", "login");

        assert!(event.id.starts_with("evt-"));
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.event_type, "login");
        assert!(event.metadata.is_none());
    }

    #[test]
    fn test_event_with_metadata() {
        let event = ActivityEvent::new("u1", "page_view")
            .with_metadata("path", "/home")
            .with_metadata("referrer", "search");

        let metadata = event.metadata.unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["path"], "/home");
    }

    #[test]
    fn test_missing_metadata_is_omitted() {
        let event = ActivityEvent::new("u1", "login");
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"userId\":\"u1\""));
        assert!(json.contains("\"eventType\":\"login\""));
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn test_payload_roundtrip_keeps_identity() {
        let event = ActivityEvent::new("u1", "login").with_metadata("ip", "10.0.0.1");
        let parsed = ActivityEvent::from_payload(&event.to_payload().unwrap()).unwrap();

        assert_eq!(parsed, event);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let event: ActivityEvent =
            serde_json::from_str(r#"{"userId":"u7","eventType":"logout"}"#).unwrap();

        assert!(event.id.starts_with("evt-"));
        assert_eq!(event.user_id, "u7");
        assert!(event.metadata.is_none());
    }

    #[test]
    fn test_event_id_alias() {
        let event: ActivityEvent = serde_json::from_str(
            r#"{"eventId":"abc","userId":"u1","eventType":"login","timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(event.id, "abc");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_malformed_payload_is_error() {
        assert!(ActivityEvent::from_payload(b"not json").is_err());
        assert!(ActivityEvent::from_payload(b"null").is_err());
        assert!(ActivityEvent::from_payload(br#"{"userId": 42}"#).is_err());
    }

    #[test]
    fn test_null_user_and_type_read_as_blank() {
        let event: ActivityEvent =
            serde_json::from_str(r#"{"userId":null,"eventType":null}"#).unwrap();

        assert_eq!(event.user_id, "");
        assert_eq!(event.event_type, "");
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ActivityEvent::new("u1", "login").validate().is_ok());

        let err = ActivityEvent::new("", "login").validate().unwrap_err();
        assert!(err.to_string().contains("userId"));

        let err = ActivityEvent::new("u1", "   ").validate().unwrap_err();
        assert!(err.to_string().contains("eventType"));
    }
}

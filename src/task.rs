//! Task envelope exchanged over the broker queue
//!
//! Wire format is a UTF-8 JSON object:
//!
//! ```json
//! {"task_id": "5f0c…", "url": "http://example.com/pic.jpg", "file_extension": "jpg"}
//! ```
//!
//! The envelope is decoded into a fixed-schema struct. Any body that is not
//! valid UTF-8 JSON, or that lacks a required field, is rejected with an
//! [`EnvelopeError`] so the worker can treat it as a poison message.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed task body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Task field '{0}' must not be empty")]
    EmptyField(&'static str),
}

/// One unit of detection work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Idempotency key and output file stem. Assigned once by the producer.
    pub task_id: String,
    /// Normalized, scheme-qualified source URL
    #[serde(rename = "url")]
    pub source_url: String,
    /// Suffix of the URL path, case preserved. Empty when the path has none.
    pub file_extension: String,
}

impl TaskEnvelope {
    /// Build an envelope with a freshly allocated random task id
    pub fn new(source_url: impl Into<String>, file_extension: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            source_url: source_url.into(),
            file_extension: file_extension.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing a struct of plain strings cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: TaskEnvelope = serde_json::from_slice(body)?;

        if envelope.task_id.trim().is_empty() {
            return Err(EnvelopeError::EmptyField("task_id"));
        }
        if envelope.source_url.trim().is_empty() {
            return Err(EnvelopeError::EmptyField("url"));
        }

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_wire_shape() {
        let envelope = TaskEnvelope {
            task_id: "abc".to_string(),
            source_url: "http://example.com/a.png".to_string(),
            file_extension: "png".to_string(),
        };

        let value: Value = serde_json::from_slice(&envelope.encode()).unwrap();
        assert_eq!(
            value,
            json!({"task_id": "abc", "url": "http://example.com/a.png", "file_extension": "png"})
        );
    }

    #[test]
    fn test_new_allocates_distinct_ids() {
        let a = TaskEnvelope::new("http://example.com/a.png", "png");
        let b = TaskEnvelope::new("http://example.com/a.png", "png");
        assert_ne!(a.task_id, b.task_id);
        assert!(Uuid::parse_str(&a.task_id).is_ok());
    }

    #[test]
    fn test_decode_missing_field_is_malformed() {
        let body = br#"{"task_id": "abc", "url": "http://example.com/a.png"}"#;
        assert!(matches!(
            TaskEnvelope::decode(body),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(TaskEnvelope::decode(b"\xff\xfenot json").is_err());
        assert!(TaskEnvelope::decode(b"[1,2,3]").is_err());
    }

    #[test]
    fn test_decode_empty_task_id() {
        let body = br#"{"task_id": " ", "url": "http://example.com/a.png", "file_extension": ""}"#;
        assert!(matches!(
            TaskEnvelope::decode(body),
            Err(EnvelopeError::EmptyField("task_id"))
        ));
    }

    #[test]
    fn test_decode_allows_empty_extension() {
        let body = br#"{"task_id": "t1", "url": "http://example.com/", "file_extension": ""}"#;
        let envelope = TaskEnvelope::decode(body).unwrap();
        assert_eq!(envelope.file_extension, "");
    }
}

//! Job message envelope carried by the message channel.

use chrono::Utc;
use lumen_core::types::{JobId, Timestamp};
use serde::de::DeserializeOwned;

/// An immutable job envelope. `id` is unique per publish and doubles as the
/// uid of the matching job run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobMessage {
    pub id: JobId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub enqueued_at: Timestamp,
}

impl JobMessage {
    /// Wrap `payload` for `topic` with a fresh time-ordered id.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            topic: topic.into(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    /// Decode the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Image reference and filename, when the payload carries them.
    pub fn subject(&self) -> JobSubject {
        JobSubject::from_payload(&self.payload)
    }
}

/// What a job is about, as far as lifecycle events are concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSubject {
    pub image_ref: Option<String>,
    pub filename: Option<String>,
}

impl JobSubject {
    /// Lenient extraction of `image_uid` and `filename` from a JSON payload.
    /// Anything that is not a JSON object yields an empty subject.
    pub fn from_payload(payload: &[u8]) -> Self {
        let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(payload) else {
            return Self::default();
        };
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        Self {
            image_ref: text("image_uid"),
            filename: text("filename"),
        }
    }
}

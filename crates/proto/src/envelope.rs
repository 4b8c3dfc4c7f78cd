use serde::{Deserialize, Serialize};

/// One application message as serialized on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Logical kind of the message; one of the [`crate::topic`] literals.
    pub topic: String,
    /// Wall-clock stamp taken at the sender. Informational only.
    pub timestamp: String,
    /// Optional text payload (ids, counts, task timestamps, results).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional file payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FilePayload>,
}

/// A file carried inside an [`Envelope`], base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePayload {
    /// Standard-base64 file contents.
    pub file: String,
    /// Bare file name the receiver should save under.
    pub filename: String,
}

impl Envelope {
    /// Build an envelope with a fresh timestamp and no payloads.
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            timestamp: wall_timestamp(),
            message: None,
            data: None,
        }
    }

    /// Decode the `message` payload as a JSON value.
    ///
    /// Used for `Processed Data` replies, whose `message` carries the
    /// worker's JSON-encoded result record. A missing or malformed
    /// payload is fatal for the dialog, never retried.
    pub fn message_json(&self) -> Result<serde_json::Value, crate::ProtoError> {
        serde_json::from_str(self.message.as_deref().unwrap_or(""))
            .map_err(crate::ProtoError::DecodePayloadFailed)
    }
}

/// Wall-clock stamp in the `2024-08-08_10-31-05_PM` shape used across
/// envelopes and log lines.
pub fn wall_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%I-%M-%S_%p").to_string()
}

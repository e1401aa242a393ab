//! Protocol decode errors

use thiserror::Error;

/// A payload that does not follow the wire contract
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Invalid worker id: '{0}'")]
    InvalidWorkerId(String),

    #[error("Invalid task id: '{0}'")]
    InvalidTaskId(String),

    #[error("Unknown feedback tag: '{0}'")]
    UnknownFeedbackTag(String),

    #[error("Feedback result is not a number: {0}")]
    InvalidResult(String),

    #[error("Unknown broadcast command: '{0}'")]
    UnknownBroadcast(String),
}

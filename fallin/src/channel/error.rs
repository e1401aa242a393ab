//! Channel error types

use thiserror::Error;

/// Errors raised by a pub/sub transport
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel is not connected")]
    NotConnected,

    #[error("Failed to connect to broker at {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Failed to publish on '{topic}': {message}")]
    Publish { topic: String, message: String },

    #[error("Failed to subscribe to '{pattern}': {message}")]
    Subscribe { pattern: String, message: String },

    #[error("Invalid topic: '{0}'")]
    InvalidTopic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_message() {
        let err = ChannelError::Publish {
            topic: "task/Worker_A1".to_string(),
            message: "timed out".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("task/Worker_A1"));
        assert!(msg.contains("timed out"));
    }
}

//! Publish/subscribe channel abstraction
//!
//! The coordinator and worker agents only ever talk through a [`Channel`]:
//! - **publish:** send a payload to a named topic with a [`Delivery`] guarantee
//! - **subscribe:** receive every payload published on topics matching a pattern
//! - **disconnect:** tear down the client and all of its subscriptions
//!
//! Topics are `/`-separated. Patterns accept MQTT-style wildcards: `+` matches
//! exactly one level, `#` matches the remaining levels.

mod error;
mod memory;
mod nats;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use error::ChannelError;
pub use memory::{MemoryBroker, MemoryChannel};
pub use nats::NatsChannel;

/// Delivery guarantee requested for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Delivery {
    /// Fire and forget
    BestEffort,
    /// Publish is acknowledged by the transport before returning
    AtLeastOnce,
}

/// A message received on a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Bytes,
}

impl Inbound {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of inbound messages for one subscribed pattern
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    pattern: String,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Subscription {
    pub(crate) fn new(pattern: impl Into<String>, rx: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self {
            pattern: pattern.into(),
            rx,
        }
    }

    /// Pattern this subscription was created with
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Wait for the next message; `None` once the channel is disconnected
    pub async fn next(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    /// Take a message if one is already buffered
    pub fn try_next(&mut self) -> Option<Inbound> {
        self.rx.try_recv().ok()
    }
}

/// Minimal publish/subscribe client
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish `payload` on `topic`
    async fn publish(&self, topic: &str, payload: Bytes, delivery: Delivery) -> Result<(), ChannelError>;

    /// Subscribe to every topic matching `pattern`
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, ChannelError>;

    /// Disconnect from the broker, closing all subscriptions of this client
    async fn disconnect(&self) -> Result<(), ChannelError>;

    /// Whether the client believes it is connected
    fn is_connected(&self) -> bool;
}

/// Check a topic against a subscription pattern
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Reject topics that cannot be published to
pub(crate) fn validate_topic(topic: &str) -> Result<(), ChannelError> {
    if topic.is_empty()
        || topic.contains(['+', '#'])
        || topic.chars().any(char::is_whitespace)
        || topic.split('/').any(str::is_empty)
    {
        return Err(ChannelError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

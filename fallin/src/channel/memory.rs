//! In-process broker
//!
//! Delivers synchronously in publish order, which gives the same per-publisher
//! ordering a real broker does. Used by the demo command and by tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Channel, ChannelError, Delivery, Inbound, Subscription, topic_matches, validate_topic};

struct Subscriber {
    client_id: String,
    pattern: String,
    tx: mpsc::UnboundedSender<Inbound>,
}

#[derive(Default)]
struct BrokerState {
    subscribers: Vec<Subscriber>,
    delivered: u64,
}

/// Shared in-memory broker; clone it to hand out to clients
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connected client
    pub fn connect(&self, client_id: impl Into<String>) -> MemoryChannel {
        let client_id = client_id.into();
        debug!(%client_id, "MemoryBroker::connect: called");
        MemoryChannel {
            broker: self.clone(),
            client_id,
            connected: AtomicBool::new(true),
        }
    }

    /// Number of live subscriptions across all clients
    pub fn subscription_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    /// Total messages handed to subscribers so far
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A poisoned lock only means a subscriber panicked mid-publish; the state is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, topic: &str, payload: Bytes) {
        let mut state = self.lock();
        let mut delivered = 0;
        state.subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if topic_matches(&sub.pattern, topic) && sub.tx.send(Inbound::new(topic, payload.clone())).is_ok() {
                delivered += 1;
            }
            true
        });
        state.delivered += delivered;
    }

    fn add_subscriber(&self, client_id: &str, pattern: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(Subscriber {
            client_id: client_id.to_string(),
            pattern: pattern.to_string(),
            tx,
        });
        Subscription::new(pattern, rx)
    }

    fn drop_client(&self, client_id: &str) {
        self.lock().subscribers.retain(|s| s.client_id != client_id);
    }
}

/// Client handle onto a [`MemoryBroker`]
pub struct MemoryChannel {
    broker: MemoryBroker,
    client_id: String,
    connected: AtomicBool,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn publish(&self, topic: &str, payload: Bytes, delivery: Delivery) -> Result<(), ChannelError> {
        debug!(client_id = %self.client_id, %topic, ?delivery, "MemoryChannel::publish: called");
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        validate_topic(topic)?;
        self.broker.deliver(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, ChannelError> {
        debug!(client_id = %self.client_id, %pattern, "MemoryChannel::subscribe: called");
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        if pattern.is_empty() {
            return Err(ChannelError::InvalidTopic(pattern.to_string()));
        }
        Ok(self.broker.add_subscriber(&self.client_id, pattern))
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        debug!(client_id = %self.client_id, "MemoryChannel::disconnect: called");
        self.connected.store(false, Ordering::SeqCst);
        self.broker.drop_client(&self.client_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

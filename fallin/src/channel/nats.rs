//! NATS-backed channel
//!
//! Topics map onto NATS subjects by swapping the level separator: `task/Worker_A1`
//! becomes `task.Worker_A1`, `+` becomes `*` and `#` becomes `>`.
//! `Delivery::AtLeastOnce` flushes after publishing, so the call only returns once the
//! client buffer has been written to the socket. The server does not acknowledge it.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{Channel, ChannelError, Delivery, Inbound, Subscription, validate_topic};

/// Channel over a NATS connection
pub struct NatsChannel {
    client: async_nats::Client,
    connected: AtomicBool,
    /// Flipped to true on disconnect; ends every subscription forwarder
    closed: watch::Sender<bool>,
}

impl NatsChannel {
    /// Connect to the NATS server at `url`, announcing `name` as the client name
    pub async fn connect(url: &str, name: &str) -> Result<Self, ChannelError> {
        debug!(%url, %name, "NatsChannel::connect: called");
        let client = async_nats::ConnectOptions::new()
            .name(name)
            .connect(url)
            .await
            .map_err(|e| ChannelError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        info!(%url, %name, "Connected to NATS");
        Ok(Self {
            client,
            connected: AtomicBool::new(true),
            closed: watch::Sender::new(false),
        })
    }
}

fn topic_to_subject(topic: &str) -> String {
    topic
        .split('/')
        .map(|level| match level {
            "+" => "*",
            "#" => ">",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn subject_to_topic(subject: &str) -> String {
    subject.replace('.', "/")
}

#[async_trait]
impl Channel for NatsChannel {
    async fn publish(&self, topic: &str, payload: Bytes, delivery: Delivery) -> Result<(), ChannelError> {
        debug!(%topic, ?delivery, "NatsChannel::publish: called");
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        validate_topic(topic)?;

        let publish_err = |e: &dyn std::fmt::Display| ChannelError::Publish {
            topic: topic.to_string(),
            message: e.to_string(),
        };

        self.client
            .publish(topic_to_subject(topic), payload)
            .await
            .map_err(|e| publish_err(&e))?;

        if delivery == Delivery::AtLeastOnce {
            self.client.flush().await.map_err(|e| publish_err(&e))?;
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, ChannelError> {
        debug!(%pattern, "NatsChannel::subscribe: called");
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }

        let mut subscriber =
            self.client
                .subscribe(topic_to_subject(pattern))
                .await
                .map_err(|e| ChannelError::Subscribe {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut closed = self.closed.subscribe();
        let owned_pattern = pattern.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = subscriber.next() => {
                        let Some(message) = message else { break };
                        let inbound = Inbound::new(subject_to_topic(message.subject.as_str()), message.payload);
                        if tx.send(inbound).is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                    _ = closed.changed() => break,
                }
            }
            if let Err(e) = subscriber.unsubscribe().await {
                warn!(pattern = %owned_pattern, error = %e, "Failed to unsubscribe");
            }
            debug!(pattern = %owned_pattern, "NatsChannel: subscription forwarder stopped");
        });

        Ok(Subscription::new(pattern, rx))
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        debug!("NatsChannel::disconnect: called");
        if self.connected.swap(false, Ordering::SeqCst) {
            self.closed.send_replace(true);
            // Pending publishes are flushed; the socket closes once the last client clone drops.
            if let Err(e) = self.client.flush().await {
                warn!(error = %e, "Flush on disconnect failed");
            }
            info!("Disconnected from NATS");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_to_subject() {
        assert_eq!(topic_to_subject("feedback"), "feedback");
        assert_eq!(topic_to_subject("task/Worker_A1"), "task.Worker_A1");
        assert_eq!(topic_to_subject("task/+"), "task.*");
        assert_eq!(topic_to_subject("task/#"), "task.>");
    }

    #[test]
    fn test_subject_to_topic() {
        assert_eq!(subject_to_topic("task.Worker_A1"), "task/Worker_A1");
        assert_eq!(subject_to_topic("registration"), "registration");
    }
}

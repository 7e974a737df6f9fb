//! Redis Pub/Sub support.

use futures::StreamExt;
use redis::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{RedisError, Result};

/// Messages buffered per subscription before the listener waits.
const SUBSCRIPTION_BUFFER: usize = 64;

/// A Pub/Sub message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel name.
    pub channel: String,
    /// Message payload.
    pub payload: String,
}

impl Message {
    /// Create a message.
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// A subscription handle.
///
/// Dropping the handle ends the background listener on its next message.
pub struct Subscription {
    receiver: mpsc::Receiver<Message>,
    channel: String,
}

impl Subscription {
    /// Create a subscription from a receiver fed by some transport.
    pub fn new(receiver: mpsc::Receiver<Message>, channel: impl Into<String>) -> Self {
        Self {
            receiver,
            channel: channel.into(),
        }
    }

    /// Get the channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receive the next message.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

/// Redis Pub/Sub client.
#[derive(Clone)]
pub struct PubSub {
    client: Client,
}

impl PubSub {
    /// Create a Pub/Sub client over an already configured Redis client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Subscribe to `channel` on a dedicated connection.
    ///
    /// A spawned task forwards messages until the [`Subscription`] is dropped
    /// or the connection closes.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel_name = channel.to_string();

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        pubsub
            .subscribe(&channel_name)
            .await
            .map_err(|e| RedisError::PubSub(e.to_string()))?;

        info!(channel = %channel_name, "Subscribed to Redis channel");

        let listening = channel_name.clone();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(channel = %listening, error = %e, "Dropping undecodable pub/sub payload");
                        continue;
                    }
                };

                if tx.send(Message::new(msg.get_channel_name(), payload)).await.is_err() {
                    break;
                }
            }
            debug!(channel = %listening, "Pub/sub listener stopped");
        });

        Ok(Subscription::new(rx, channel_name))
    }
}

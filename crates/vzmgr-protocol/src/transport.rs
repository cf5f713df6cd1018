// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pub/sub transports.
//!
//! The bus is at-least-once and unordered across clusters. A [`Subscription`]
//! ends (yields `None`) when the underlying connection is lost; callers treat
//! that as fatal.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::ProtocolError;
use crate::topic;

/// Buffered messages per subscription before the forwarder applies backpressure.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// A message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

/// Stream of messages matching one subscription pattern
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    fn channel() -> (mpsc::Sender<Message>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self { rx })
    }

    /// Next message, or `None` once the transport is gone.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// A pub/sub bus
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload on a topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ProtocolError>;

    /// Subscribe to every topic matching `pattern` (`*` matches one token).
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, ProtocolError>;
}

// ============================================================================
// In-memory transport
// ============================================================================

/// Process-local bus backed by a tokio broadcast channel.
///
/// Used for embedded deployments and tests. [`MemoryTransport::close`]
/// simulates losing the connection.
pub struct MemoryTransport {
    sender: Mutex<Option<broadcast::Sender<Message>>>,
}

impl MemoryTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn sender(&self) -> Result<broadcast::Sender<Message>, ProtocolError> {
        self.sender
            .lock()
            .map_err(|_| ProtocolError::Transport("transport lock poisoned".to_string()))?
            .clone()
            .ok_or(ProtocolError::Closed)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender().map(|s| s.receiver_count()).unwrap_or(0)
    }

    /// Drop the bus; every subscription ends and further calls fail.
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ProtocolError> {
        let sender = self.sender()?;
        // No receivers is not an error on a pub/sub bus.
        let _ = sender.send(Message {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, ProtocolError> {
        let mut receiver = self.sender()?.subscribe();
        let (tx, subscription) = Subscription::channel();
        let pattern = pattern.to_string();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if !topic::matches(&pattern, &message.topic) {
                            continue;
                        }
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(pattern = %pattern, skipped, "Subscription lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(pattern = %pattern, "Memory subscription ended");
        });

        Ok(subscription)
    }
}

// ============================================================================
// Redis transport
// ============================================================================

#[cfg(feature = "redis")]
pub use self::redis_transport::RedisTransport;

#[cfg(feature = "redis")]
mod redis_transport {
    use super::*;

    use futures::StreamExt;
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;

    /// Redis pub/sub bus.
    ///
    /// Publishing goes through a [`ConnectionManager`] (reconnects on its
    /// own). Each subscription holds a dedicated pub/sub connection; when it
    /// drops, the subscription ends.
    #[derive(Clone)]
    pub struct RedisTransport {
        client: redis::Client,
        publisher: ConnectionManager,
    }

    impl RedisTransport {
        pub async fn connect(url: &str) -> Result<Self, ProtocolError> {
            let client = redis::Client::open(url)?;
            let publisher = client.get_connection_manager().await?;
            Ok(Self { client, publisher })
        }
    }

    impl std::fmt::Debug for RedisTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisTransport")
                .field("addr", &self.client.get_connection_info().addr)
                .finish()
        }
    }

    #[async_trait]
    impl Transport for RedisTransport {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ProtocolError> {
            let mut conn = self.publisher.clone();
            let _: i64 = conn.publish(topic, &payload[..]).await?;
            Ok(())
        }

        async fn subscribe(&self, pattern: &str) -> Result<Subscription, ProtocolError> {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.psubscribe(pattern).await?;
            let (tx, subscription) = Subscription::channel();
            let pattern = pattern.to_string();

            tokio::spawn(async move {
                let mut stream = pubsub.into_on_message();
                while let Some(msg) = stream.next().await {
                    let message = Message {
                        topic: msg.get_channel_name().to_string(),
                        payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
                    };
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                warn!(pattern = %pattern, "Redis subscription ended");
            });

            Ok(subscription)
        }
    }
}

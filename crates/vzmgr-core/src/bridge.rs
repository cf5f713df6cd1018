// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message bridge for vzmgr-core.
//!
//! Subscribes to every cluster-to-cloud topic, decodes the envelope and
//! dispatches it by [`MessageKind`] to the controller's agent handlers. A
//! handler reply is published on the matching `c2v.<id>.<kind>Resp` topic.
//!
//! Each envelope is handled in its own task. The bridge keeps no state of its
//! own, so losing the transport ends [`Bridge::run`] with an error and the
//! process is expected to restart.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use vzmgr_protocol::messages::{
    RegisterVizierAck, RegisterVizierRequest, SslCertRequest, VizierHeartbeat,
};
use vzmgr_protocol::{Direction, Envelope, Message, MessageKind, ProtocolError, Topic, Transport};

use crate::agent_handlers::{handle_ssl_request, handle_vizier_connected, handle_vizier_heartbeat};
use crate::controller::ControllerState;
use crate::error::{CoreError, Result};
use crate::shard::ShardRange;

/// Errors that stop the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to subscribe to {pattern}: {source}")]
    Subscribe {
        pattern: String,
        #[source]
        source: ProtocolError,
    },

    #[error("transport closed")]
    TransportClosed,
}

/// Handler for one message kind; returns an optional reply envelope.
pub type Handler =
    fn(Arc<ControllerState>, Envelope) -> BoxFuture<'static, Result<Option<Envelope>>>;

/// Dispatch table from message kind to handler.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<MessageKind, Handler>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl HandlerTable {
    /// Table with the controller's agent handlers.
    pub fn controller() -> Self {
        Self::default()
            .with(MessageKind::Heartbeat, dispatch_heartbeat)
            .with(MessageKind::Register, dispatch_register)
            .with(MessageKind::Ssl, dispatch_ssl)
    }

    /// Register (or replace) the handler of `kind`.
    pub fn with(mut self, kind: MessageKind, handler: Handler) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: MessageKind) -> Option<Handler> {
        self.handlers.get(&kind).copied()
    }

    pub fn kinds(&self) -> impl Iterator<Item = MessageKind> + '_ {
        self.handlers.keys().copied()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Reject a payload that names a different cluster than its envelope.
fn check_payload_cluster(envelope: &Envelope, payload_cluster: Uuid) -> Result<()> {
    if payload_cluster != envelope.cluster_id {
        return Err(CoreError::invalid_argument(
            "vizier_id",
            format!(
                "payload is for {payload_cluster} but envelope is for {}",
                envelope.cluster_id
            ),
        ));
    }
    Ok(())
}

fn dispatch_heartbeat(
    state: Arc<ControllerState>,
    envelope: Envelope,
) -> BoxFuture<'static, Result<Option<Envelope>>> {
    Box::pin(async move {
        let heartbeat: VizierHeartbeat = envelope.decode()?;
        check_payload_cluster(&envelope, heartbeat.vizier_id)?;
        handle_vizier_heartbeat(&state, heartbeat).await;
        Ok(None)
    })
}

fn dispatch_register(
    state: Arc<ControllerState>,
    envelope: Envelope,
) -> BoxFuture<'static, Result<Option<Envelope>>> {
    Box::pin(async move {
        let request: RegisterVizierRequest = envelope.decode()?;
        check_payload_cluster(&envelope, request.vizier_id)?;

        // The agent always gets an ack, failed or not.
        let ack = match handle_vizier_connected(&state, request).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(cluster_id = %envelope.cluster_id, error = %e, "Register failed");
                RegisterVizierAck::failed(e.to_string())
            }
        };

        Ok(Some(Envelope::new(envelope.cluster_id, MessageKind::Register, &ack)?))
    })
}

fn dispatch_ssl(
    state: Arc<ControllerState>,
    envelope: Envelope,
) -> BoxFuture<'static, Result<Option<Envelope>>> {
    Box::pin(async move {
        let request: SslCertRequest = envelope.decode()?;
        check_payload_cluster(&envelope, request.vizier_id)?;
        let response = handle_ssl_request(&state, request).await?;
        Ok(Some(Envelope::new(envelope.cluster_id, MessageKind::Ssl, &response)?))
    })
}

// ============================================================================
// Bridge
// ============================================================================

/// Relay between the bus and the controller.
pub struct Bridge {
    transport: Arc<dyn Transport>,
    state: Arc<ControllerState>,
    shard_range: ShardRange,
    handlers: HandlerTable,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("transport", &"...")
            .field("shard_range", &self.shard_range)
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl Bridge {
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<ControllerState>,
        shard_range: ShardRange,
    ) -> Self {
        Self {
            transport,
            state,
            shard_range,
            handlers: HandlerTable::controller(),
        }
    }

    /// Replace the dispatch table.
    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// Relay messages until shutdown is signalled or the transport is lost.
    #[instrument(skip_all, fields(shard_range = %self.shard_range))]
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> std::result::Result<(), BridgeError> {
        let pattern = Topic::inbound_pattern();
        let mut subscription =
            self.transport
                .subscribe(&pattern)
                .await
                .map_err(|source| BridgeError::Subscribe {
                    pattern: pattern.clone(),
                    source,
                })?;

        info!(%pattern, "Message bridge started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Message bridge received shutdown signal");
                        return Ok(());
                    }
                }

                next = subscription.next() => {
                    match next {
                        Some(message) => self.route(message),
                        None => {
                            error!("Message bridge lost its transport");
                            return Err(BridgeError::TransportClosed);
                        }
                    }
                }
            }
        }
    }

    /// Validate a message and spawn its handler.
    fn route(&self, message: Message) {
        let topic: Topic = match message.topic.parse() {
            Ok(topic) => topic,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Dropping message on malformed topic");
                return;
            }
        };

        if topic.direction != Direction::VizierToCloud || topic.is_reply() {
            trace!(%topic, "Ignoring reply topic");
            return;
        }
        if !self.shard_range.contains(&topic.cluster_id) {
            trace!(%topic, "Cluster outside shard range");
            return;
        }

        let kind: MessageKind = match topic.kind.parse() {
            Ok(kind) => kind,
            Err(_) => {
                debug!(%topic, "Dropping message of unknown kind");
                return;
            }
        };
        let Some(handler) = self.handlers.get(kind) else {
            debug!(%topic, %kind, "No handler for message kind");
            return;
        };

        let envelope = match Envelope::from_bytes(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "Dropping malformed envelope");
                return;
            }
        };
        if envelope.cluster_id != topic.cluster_id || envelope.kind != kind {
            warn!(
                %topic,
                envelope_cluster = %envelope.cluster_id,
                envelope_kind = %envelope.kind,
                "Envelope does not match its topic"
            );
            return;
        }

        let state = self.state.clone();
        let transport = self.transport.clone();
        let reply_topic = topic.reply();
        tokio::spawn(async move {
            match handler(state, envelope).await {
                Ok(Some(reply)) => publish_reply(transport.as_ref(), &reply_topic, &reply).await,
                Ok(None) => {}
                Err(e) => warn!(%topic, error = %e, "Handler failed, no reply sent"),
            }
        });
    }
}

async fn publish_reply(transport: &dyn Transport, topic: &Topic, reply: &Envelope) {
    let payload = match reply.to_bytes() {
        Ok(payload) => payload,
        Err(e) => {
            error!(%topic, error = %e, "Failed to encode reply");
            return;
        }
    };
    match transport.publish(&topic.to_string(), payload).await {
        Ok(()) => debug!(%topic, "Reply published"),
        Err(e) => error!(%topic, error = %e, "Failed to publish reply"),
    }
}

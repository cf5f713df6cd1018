// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! vzmgr Protocol - message bridge wire layer
//!
//! This crate provides the wire layer between the cloud controller and the
//! edge agents ("clusters"). Clusters cannot be dialed directly; every control
//! message travels over a pub/sub bus and is relayed by the controller's
//! message bridge.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      vzmgr-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Topics: v2c.<ver>.<cluster>.<kind> / c2v.<cluster>.<kind>  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Envelope: JSON { cluster_id, kind, payload }               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: Redis pub/sub (redis) | in-memory (tokio)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use vzmgr_protocol::{Envelope, MessageKind, Topic, Transport};
//! use vzmgr_protocol::messages::SslCertRequest;
//!
//! let request = SslCertRequest { vizier_id: cluster_id };
//! let envelope = Envelope::new(cluster_id, MessageKind::Ssl, &request)?;
//! let topic = Topic::inbound(cluster_id, MessageKind::Ssl.as_str());
//! transport.publish(&topic.to_string(), envelope.to_bytes()?).await?;
//! ```

pub mod envelope;
pub mod error;
pub mod messages;
pub mod topic;
pub mod transport;

pub use envelope::{Envelope, MAX_ENVELOPE_SIZE, MessageKind};
pub use error::ProtocolError;
pub use topic::{Direction, PROTOCOL_VERSION, Topic};
pub use transport::{MemoryTransport, Message, Subscription, Transport};

#[cfg(feature = "redis")]
pub use transport::RedisTransport;

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! vzmgr Core - Fleet Connectivity Controller
//!
//! This crate tracks the liveness, identity and upgrade state of edge agents
//! ("clusters") that run in customer infrastructure and can only be reached
//! through a bridged pub/sub channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   v2c.<ver>.<id>.<kind>   ┌──────────────────────┐
//! │  Edge agents         │ ────────────────────────► │  Message bridge      │
//! │  (one per cluster)   │ ◄──────────────────────── │  (bridge)            │
//! └──────────────────────┘   c2v.<id>.<kind>Resp     └──────────┬───────────┘
//!                                                               │ dispatch by kind
//!                                                               ▼
//! ┌──────────────────────┐                          ┌──────────────────────┐
//! │  Management callers  │ ───────────────────────► │  Connectivity        │
//! │  (cloud services)    │                          │  controller          │
//! └──────────────────────┘                          └──────────┬───────────┘
//!                                                               │
//!                        ┌──────────────────┬──────────────────┤
//!                        ▼                  ▼                  ▼
//!               ┌────────────────┐ ┌────────────────┐ ┌────────────────┐
//!               │ Directory      │ │ Update trigger │ │ Address        │
//!               │ (PG / SQLite)  │ │ (queue + bus)  │ │ resolver       │
//!               └────────────────┘ └────────────────┘ └────────────────┘
//! ```
//!
//! # Cluster Status State Machine
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ DISCONNECTED │ ◄── provisioned
//!                 └──────┬───────┘
//!                        │ register
//!                        ▼
//!  ┌───────────┐   ┌───────────┐   ┌──────────┐
//!  │ UNHEALTHY │◄─►│ CONNECTED │◄─►│ HEALTHY  │
//!  └─────┬─────┘   └───────────┘   └────┬─────┘
//!        │        bootstrap heartbeat   │
//!        └──────────► ┌──────────┐ ◄────┘
//!                     │ UPDATING │
//!                     └──────────┘
//! ```
//!
//! A bootstrap heartbeat always yields `UPDATING`. Any other heartbeat
//! without an address yields `UNHEALTHY`.
//!
//! # Sharding
//!
//! The shard of a cluster is the last byte of its id, written as two hex
//! digits. A replica owns an inclusive range such as `00-7f` and ignores
//! envelopes of clusters outside it.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `VZMGR_DATABASE_URL` | Yes | - | `postgres://` or `sqlite:` URL |
//! | `VZMGR_DATABASE_KEY` | Yes | - | Signing-key encryption key (hex or base64) |
//! | `VZMGR_REDIS_URL` | No | `redis://127.0.0.1:6379` | Pub/sub bus |
//! | `VZMGR_DOMAIN_NAME` | No | `dev.withpixie.dev` | Cluster DNS domain |
//! | `VZMGR_SHARD_RANGE` | No | `00-ff` | Owned shards |
//! | `VZMGR_LATEST_VIZIER_VERSION` | No | - | Auto-update target |
//! | `VZMGR_UPDATE_QUEUE_SIZE` | No | `256` | Update queue capacity |
//! | `VZMGR_CLUSTER_TLS_CERT` / `VZMGR_CLUSTER_TLS_KEY` | No | - | PEM files served on SSL requests |

/// Agent handlers (register, heartbeat, TLS requests).
pub mod agent_handlers;

/// Message bridge between the bus and the agent handlers.
pub mod bridge;

/// Configuration loaded from environment variables.
pub mod config;

/// Shared controller state and caller identity.
pub mod controller;

/// Encryption of cluster signing keys at rest.
pub mod crypto;

/// Directory store trait with PostgreSQL and SQLite backends.
pub mod directory;

/// Error types with stable error codes.
pub mod error;

/// Management handlers (lookups, config updates, connection info, shards).
pub mod management_handlers;

/// Embedded database migrations.
pub mod migrations;

/// Provisioning and claiming of cluster records.
pub mod provisioning;

/// Cluster DNS names and TLS material.
pub mod resolver;

/// Embeddable runtime (bridge + update worker).
pub mod runtime;

/// Shard derivation and ranges.
pub mod shard;

/// Cluster status and its transitions.
pub mod status;

/// Cluster-scoped JWT issuance.
pub mod token;

/// Update trigger and update queue.
pub mod updater;

#[cfg(test)]
mod test_support;

pub use error::{CoreError, Result};
pub use runtime::ControllerRuntime;

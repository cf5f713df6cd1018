// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payloads exchanged between clusters and the controller.
//!
//! Every payload travels inside an [`Envelope`](crate::Envelope) whose
//! [`MessageKind`](crate::MessageKind) tells the bridge which type to decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Agent state
// ============================================================================

/// Status an agent declares about itself in a heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Updating,
    Connected,
    Disconnected,
}

/// Lifecycle phase of a control-plane pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodPhase {
    #[default]
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
    Terminated,
}

/// Status of one control-plane pod as reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    pub name: String,
    pub status: PodPhase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
}

/// Pod name to pod status.
pub type PodStatuses = BTreeMap<String, PodStatus>;

// ============================================================================
// Cluster to cloud
// ============================================================================

/// Periodic status report from a cluster (`kind = heartbeat`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VizierHeartbeat {
    pub vizier_id: Uuid,
    /// Agent-side wall clock, nanoseconds since the epoch.
    pub time: i64,
    pub sequence_number: i64,
    /// Externally reachable IP; empty when the agent has none.
    pub address: String,
    pub port: i32,
    pub status: AgentStatus,
    pub bootstrap_mode: bool,
    pub bootstrap_version: String,
    pub pod_statuses: PodStatuses,
    pub num_nodes: i32,
    pub num_instrumented_nodes: i32,
    pub disable_auto_update: bool,
}

/// Kubernetes identity reported when an agent connects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VizierClusterInfo {
    pub cluster_uid: String,
    pub cluster_version: String,
    pub vizier_version: String,
}

/// Sent by an agent when it (re)connects (`kind = register`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterVizierRequest {
    pub vizier_id: Uuid,
    pub jwt_key: String,
    pub address: String,
    pub cluster_info: VizierClusterInfo,
}

/// Outcome of a register request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStatus {
    Ok,
    Failed,
}

/// Reply to [`RegisterVizierRequest`], published on `c2v.<id>.registerResp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVizierAck {
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl RegisterVizierAck {
    pub fn ok() -> Self {
        Self {
            status: AckStatus::Ok,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Failed,
            message: message.into(),
        }
    }
}

/// Request for the cluster's TLS material (`kind = ssl`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslCertRequest {
    pub vizier_id: Uuid,
}

/// Reply to [`SslCertRequest`], published on `c2v.<id>.sslResp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslCertResponse {
    pub key: String,
    pub cert: String,
}

// ============================================================================
// Cloud to cluster
// ============================================================================

/// Instructs a cluster to update or install itself (`kind = update`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrInstallRequest {
    pub vizier_id: Uuid,
    pub version: String,
    #[serde(default)]
    pub redeploy_etcd: bool,
}

// ============================================================================
// Bus events
// ============================================================================

/// Published on `VizierConnected` once an agent is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConnected {
    pub org_id: Uuid,
    pub vizier_id: Uuid,
    pub k8s_uid: String,
}

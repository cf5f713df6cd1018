// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Management handlers for vzmgr-core.
//!
//! These handlers serve the request path used by the rest of the cloud:
//! cluster lookups, config updates, connection info and shard listings.
//! Ids arrive as strings so a malformed id can be reported as such.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use vzmgr_protocol::messages::PodStatuses;

use crate::controller::{AuthContext, ControllerState, parse_id};
use crate::crypto::open_signing_key;
use crate::directory::{ClusterEntry, ConfigUpdate, ShardMember};
use crate::error::{CoreError, Result};
use crate::shard::ShardRange;
use crate::status::ClusterStatus;
use crate::token::sign_cluster_token;
use crate::updater::UpdateAck;

/// Per-cluster settings exposed to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VizierConfig {
    pub passthrough_enabled: bool,
    pub auto_update_enabled: bool,
}

/// Everything the cloud knows about one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VizierInfo {
    pub vizier_id: Uuid,
    pub status: ClusterStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub config: VizierConfig,
    pub vizier_version: String,
    pub cluster_version: String,
    pub cluster_name: String,
    pub cluster_uid: String,
    pub num_nodes: i32,
    pub num_instrumented_nodes: i32,
    pub control_plane_pod_statuses: PodStatuses,
}

impl From<ClusterEntry> for VizierInfo {
    fn from(entry: ClusterEntry) -> Self {
        let ClusterEntry { cluster, info } = entry;
        Self {
            vizier_id: cluster.id,
            status: info.status,
            last_heartbeat: info.last_heartbeat,
            config: VizierConfig {
                passthrough_enabled: info.passthrough_enabled,
                auto_update_enabled: info.auto_update_enabled,
            },
            vizier_version: info.vizier_version,
            cluster_version: cluster.cluster_version,
            cluster_name: cluster.name.unwrap_or_default(),
            cluster_uid: cluster.k8s_uid,
            num_nodes: info.num_nodes,
            num_instrumented_nodes: info.num_instrumented_nodes,
            control_plane_pod_statuses: info.control_plane_pod_statuses,
        }
    }
}

/// Partial config update; unset fields stay as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VizierConfigUpdate {
    pub passthrough_enabled: Option<bool>,
    pub auto_update_enabled: Option<bool>,
}

/// Where and how to talk to a cluster directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// `https://<address>`, empty when the cluster has no address.
    pub ip_address: String,
    pub token: String,
}

// ============================================================================
// Lookups
// ============================================================================

/// Look up a cluster owned by the caller's org.
async fn owned_cluster(
    state: &ControllerState,
    auth: &AuthContext,
    vizier_id: &str,
) -> Result<ClusterEntry> {
    let cluster_id = parse_id("vizier_id", vizier_id)?;
    let entry = state
        .directory
        .get_cluster(cluster_id)
        .await?
        .ok_or_else(|| CoreError::not_found(cluster_id))?;

    if entry.cluster.org_id != auth.org_id {
        return Err(CoreError::permission_denied(format!(
            "cluster {cluster_id} belongs to another org"
        )));
    }
    Ok(entry)
}

/// Handle a single cluster lookup.
#[instrument(skip(state, auth), fields(org_id = %auth.org_id))]
pub async fn handle_get_vizier_info(
    state: &ControllerState,
    auth: &AuthContext,
    vizier_id: &str,
) -> Result<VizierInfo> {
    owned_cluster(state, auth, vizier_id).await.map(Into::into)
}

/// Handle a batch lookup.
///
/// Returns one slot per requested id, in request order. Malformed, missing
/// and foreign ids yield `None` instead of failing the batch.
#[instrument(
    skip(state, auth, vizier_ids),
    fields(org_id = %auth.org_id, count = vizier_ids.len())
)]
pub async fn handle_get_vizier_infos(
    state: &ControllerState,
    auth: &AuthContext,
    vizier_ids: &[String],
) -> Result<Vec<Option<VizierInfo>>> {
    let parsed: Vec<Option<Uuid>> = vizier_ids
        .iter()
        .map(|raw| parse_id("vizier_id", raw).ok())
        .collect();
    let valid: Vec<Uuid> = parsed.iter().flatten().copied().collect();

    let found: HashMap<Uuid, VizierInfo> = state
        .directory
        .get_clusters(&valid)
        .await?
        .into_iter()
        .filter(|entry| entry.cluster.org_id == auth.org_id)
        .map(|entry| (entry.cluster.id, VizierInfo::from(entry)))
        .collect();

    debug!(found = found.len(), "Batch lookup complete");

    Ok(parsed
        .into_iter()
        .map(|id| id.and_then(|id| found.get(&id).cloned()))
        .collect())
}

/// Handle listing every cluster id of an org.
#[instrument(skip(state, auth), fields(caller_org_id = %auth.org_id))]
pub async fn handle_get_viziers_by_org(
    state: &ControllerState,
    auth: &AuthContext,
    org_id: &str,
) -> Result<Vec<Uuid>> {
    let org_id = parse_id("org_id", org_id)?;
    if org_id != auth.org_id {
        return Err(CoreError::permission_denied(
            "org does not match the caller's org",
        ));
    }
    state.directory.list_cluster_ids_by_org(org_id).await
}

/// Handle listing the clusters of a shard range.
///
/// Bounds are two hex digits each, inclusive, `from <= to`.
#[instrument(skip(state))]
pub async fn handle_get_viziers_by_shard(
    state: &ControllerState,
    from_shard_id: &str,
    to_shard_id: &str,
) -> Result<Vec<ShardMember>> {
    let range = ShardRange::parse(from_shard_id, to_shard_id)?;
    state.directory.list_by_shard(&range).await
}

// ============================================================================
// Mutations
// ============================================================================

/// Handle a partial config update.
///
/// Auto-update may be disabled here but never enabled; only the cluster's
/// own heartbeat turns it back on.
///
/// # Errors
///
/// - `InvalidArgument` for a malformed id or an attempt to enable auto-update
/// - `NotFound` for an unknown cluster or one of another org
#[instrument(skip(state, auth), fields(org_id = %auth.org_id))]
pub async fn handle_update_vizier_config(
    state: &ControllerState,
    auth: &AuthContext,
    vizier_id: &str,
    update: VizierConfigUpdate,
) -> Result<()> {
    let cluster_id = parse_id("vizier_id", vizier_id)?;
    if update.auto_update_enabled == Some(true) {
        return Err(CoreError::invalid_argument(
            "auto_update_enabled",
            "auto-update cannot be enabled through a config update",
        ));
    }

    match state.directory.get_cluster(cluster_id).await? {
        Some(entry) if entry.cluster.org_id == auth.org_id => {}
        _ => return Err(CoreError::not_found(cluster_id)),
    }

    let update = ConfigUpdate {
        passthrough_enabled: update.passthrough_enabled,
        auto_update_enabled: update.auto_update_enabled,
    };
    if update.is_empty() {
        debug!("Empty config update");
        return Ok(());
    }

    if !state.directory.update_config(cluster_id, &update).await? {
        return Err(CoreError::not_found(cluster_id));
    }

    info!(%cluster_id, ?update, "Cluster config updated");
    Ok(())
}

/// Handle a request for direct connection details.
///
/// The token is signed with the cluster's own (decrypted) signing key.
#[instrument(skip(state, auth), fields(org_id = %auth.org_id))]
pub async fn handle_get_vizier_connection_info(
    state: &ControllerState,
    auth: &AuthContext,
    vizier_id: &str,
) -> Result<ConnectionInfo> {
    let entry = owned_cluster(state, auth, vizier_id).await?;
    if entry.info.jwt_signing_key.is_empty() {
        return Err(CoreError::internal(format!(
            "cluster {} has not registered a signing key",
            entry.cluster.id
        )));
    }

    let signing_key = open_signing_key(state.encryptor.as_ref(), &entry.info.jwt_signing_key)?;
    let token = sign_cluster_token(&signing_key, entry.cluster.id)?;

    let ip_address = if entry.info.address.is_empty() {
        String::new()
    } else {
        format!("https://{}", entry.info.address)
    };

    Ok(ConnectionInfo { ip_address, token })
}

/// Handle an explicit update (or install) request for a cluster.
#[instrument(skip(state, auth), fields(org_id = %auth.org_id))]
pub async fn handle_update_or_install_vizier(
    state: &ControllerState,
    auth: &AuthContext,
    vizier_id: &str,
    version: &str,
    redeploy_etcd: bool,
) -> Result<UpdateAck> {
    let entry = owned_cluster(state, auth, vizier_id).await?;
    let ack = state
        .updater
        .update_or_install(entry.cluster.id, version, redeploy_etcd)
        .await?;

    info!(cluster_id = %entry.cluster.id, version = %ack.version, "Update requested by user");
    Ok(ack)
}

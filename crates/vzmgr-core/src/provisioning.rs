// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning and claiming of cluster records.
//!
//! A new deployment either re-uses the record it already owns (same
//! Kubernetes UID), claims the oldest unused record of its org, or gets a
//! fresh one. Names are kept unique per org.

use chrono::Utc;
use rand::Rng;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::controller::{AuthContext, ControllerState};
use crate::directory::{ClaimUpdate, ClusterEntry, DirectoryStore, NewCluster};
use crate::error::{CoreError, Result};

/// Project assigned to newly created clusters.
pub const DEFAULT_PROJECT_NAME: &str = "default";

/// Request to provision (or claim) a cluster for a deployment.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub k8s_uid: String,
    pub cluster_name: String,
    pub cluster_version: String,
}

/// Name selected before collision checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameChoice {
    /// Keep the record's current name.
    KeepExisting(String),
    /// Use the requested name, suffixed if another cluster already has it.
    Desired(String),
    /// Nothing to go on; generate a name.
    Generate,
}

/// Apply the naming rule to a record's current name and a requested name.
///
/// The requested name is trimmed. An empty request, an identical name, or a
/// current name that starts with the request (`foo_1234` for `foo`) keeps
/// the current name.
pub fn choose_name(existing: Option<&str>, desired: &str) -> NameChoice {
    let desired = desired.trim();
    match existing.filter(|name| !name.is_empty()) {
        Some(existing) if desired.is_empty() || existing.starts_with(desired) => {
            NameChoice::KeepExisting(existing.to_string())
        }
        None if desired.is_empty() => NameChoice::Generate,
        _ => NameChoice::Desired(desired.to_string()),
    }
}

/// Resolve a [`NameChoice`] to a name no other cluster of the org uses.
pub async fn resolve_name(
    directory: &dyn DirectoryStore,
    org_id: Uuid,
    cluster_id: Option<Uuid>,
    choice: NameChoice,
) -> Result<String> {
    match choice {
        NameChoice::KeepExisting(name) => Ok(name),
        NameChoice::Desired(name) => {
            if !directory.name_taken(org_id, &name, cluster_id).await? {
                return Ok(name);
            }
            loop {
                let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
                let candidate = format!("{name}_{suffix}");
                if !directory.name_taken(org_id, &candidate, cluster_id).await? {
                    return Ok(candidate);
                }
            }
        }
        NameChoice::Generate => loop {
            let candidate = format!("cluster_{}", hex::encode(rand::random::<[u8; 4]>()));
            if !directory.name_taken(org_id, &candidate, cluster_id).await? {
                return Ok(candidate);
            }
        },
    }
}

/// Provision a cluster for a deployment, re-using records where possible.
///
/// Resolution order:
/// 1. A record of the org with the requested Kubernetes UID. It is claimed
///    only while DISCONNECTED.
/// 2. The oldest DISCONNECTED record of the org without a UID.
/// 3. A new record.
///
/// # Errors
///
/// Returns `AlreadyActive` if the matching record is not DISCONNECTED, or
/// stops being DISCONNECTED before the claim is written. Nothing is
/// modified in that case.
#[instrument(skip(state, auth, request), fields(org_id = %auth.org_id, k8s_uid = %request.k8s_uid))]
pub async fn handle_provision_or_claim_vizier(
    state: &ControllerState,
    auth: &AuthContext,
    request: ProvisionRequest,
) -> Result<Uuid> {
    let directory = state.directory.as_ref();
    let org_id = auth.org_id;

    if !request.k8s_uid.is_empty() {
        if let Some(entry) = directory.find_by_k8s_uid(org_id, &request.k8s_uid).await? {
            if !entry.info.status.is_claimable() {
                return Err(CoreError::AlreadyActive {
                    cluster_id: entry.cluster.id.to_string(),
                });
            }
            return claim(directory, entry, &request).await;
        }
    }

    if let Some(entry) = directory.oldest_unclaimed(org_id).await? {
        return claim(directory, entry, &request).await;
    }

    let cluster_id = Uuid::new_v4();
    let name = resolve_name(
        directory,
        org_id,
        None,
        choose_name(None, &request.cluster_name),
    )
    .await?;

    directory
        .create_cluster(&NewCluster {
            id: cluster_id,
            org_id,
            k8s_uid: request.k8s_uid,
            name: Some(name.clone()),
            cluster_version: request.cluster_version,
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            created_at: Utc::now(),
        })
        .await?;

    info!(%cluster_id, %name, user_id = %auth.user_id, "Provisioned new cluster");
    Ok(cluster_id)
}

async fn claim(
    directory: &dyn DirectoryStore,
    entry: ClusterEntry,
    request: &ProvisionRequest,
) -> Result<Uuid> {
    let cluster = entry.cluster;
    let name = resolve_name(
        directory,
        cluster.org_id,
        Some(cluster.id),
        choose_name(cluster.name.as_deref(), &request.cluster_name),
    )
    .await?;

    let claimed = directory
        .claim_cluster(
            cluster.id,
            &ClaimUpdate {
                k8s_uid: request.k8s_uid.clone(),
                name: Some(name.clone()),
                cluster_version: request.cluster_version.clone(),
            },
        )
        .await?;
    if !claimed {
        return Err(CoreError::AlreadyActive {
            cluster_id: cluster.id.to_string(),
        });
    }

    info!(cluster_id = %cluster.id, %name, "Claimed cluster");
    Ok(cluster.id)
}

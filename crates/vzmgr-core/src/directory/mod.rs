// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Directory store interfaces and backends for vzmgr-core.
//!
//! The directory is the only owner of persisted cluster state. It holds two
//! tables kept 1:1: `vizier_clusters` (identity) and `vizier_cluster_info`
//! (liveness and config). Both backends store ids as canonical lowercase UUID
//! strings so the shard of a cluster is a plain substring of its id.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresDirectory;
pub use self::sqlite::SqliteDirectory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use vzmgr_protocol::messages::PodStatuses;

use crate::error::{CoreError, Result};
use crate::shard::ShardRange;
use crate::status::ClusterStatus;

/// Identity of one registered edge deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRecord {
    /// Stable cluster ID.
    pub id: Uuid,
    /// Owning org.
    pub org_id: Uuid,
    /// Kubernetes UID; empty until first claim or connect.
    pub k8s_uid: String,
    /// Human label, unique within the org.
    pub name: Option<String>,
    pub cluster_version: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
}

/// Liveness and configuration of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStatusRecord {
    pub status: ClusterStatus,
    pub address: String,
    /// Salted and encrypted signing key.
    pub jwt_signing_key: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub vizier_version: String,
    pub passthrough_enabled: bool,
    pub auto_update_enabled: bool,
    pub num_nodes: i32,
    pub num_instrumented_nodes: i32,
    pub control_plane_pod_statuses: PodStatuses,
}

/// A cluster with its status record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEntry {
    pub cluster: ClusterRecord,
    pub info: ClusterStatusRecord,
}

/// Result row of a shard scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardMember {
    pub cluster_id: Uuid,
    pub org_id: Uuid,
    pub k8s_uid: String,
}

/// A cluster to create (status starts DISCONNECTED).
#[derive(Debug, Clone)]
pub struct NewCluster {
    pub id: Uuid,
    pub org_id: Uuid,
    pub k8s_uid: String,
    pub name: Option<String>,
    pub cluster_version: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
}

/// Fields written when a disconnected record is claimed.
#[derive(Debug, Clone)]
pub struct ClaimUpdate {
    pub k8s_uid: String,
    pub name: Option<String>,
    pub cluster_version: String,
}

/// Fields written when an agent connects.
#[derive(Debug, Clone)]
pub struct ConnectUpdate {
    pub cluster_id: Uuid,
    pub status: ClusterStatus,
    /// Already sealed signing key.
    pub jwt_signing_key: String,
    /// Ignored when empty so a reconnect never wipes a known uid.
    pub k8s_uid: String,
    pub cluster_version: String,
    pub vizier_version: String,
    pub address: String,
    pub connected_at: DateTime<Utc>,
}

/// Fields written for every heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatUpdate {
    pub cluster_id: Uuid,
    pub status: ClusterStatus,
    pub address: String,
    pub last_heartbeat: DateTime<Utc>,
    pub pod_statuses: PodStatuses,
    pub num_nodes: i32,
    pub num_instrumented_nodes: i32,
    pub auto_update_enabled: bool,
}

/// Partial config update; `None` leaves a field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub passthrough_enabled: Option<bool>,
    pub auto_update_enabled: Option<bool>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.passthrough_enabled.is_none() && self.auto_update_enabled.is_none()
    }
}

/// Durable cluster directory.
///
/// Update methods return `false` when the target row does not exist (or, for
/// [`DirectoryStore::claim_cluster`], is no longer claimable).
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn create_cluster(&self, cluster: &NewCluster) -> Result<()>;

    async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<ClusterEntry>>;

    /// Batch lookup; missing ids are simply absent from the result.
    async fn get_clusters(&self, cluster_ids: &[Uuid]) -> Result<Vec<ClusterEntry>>;

    /// Cluster ids of an org, oldest first.
    async fn list_cluster_ids_by_org(&self, org_id: Uuid) -> Result<Vec<Uuid>>;

    /// Clusters with a k8s uid whose shard lies in `range`.
    async fn list_by_shard(&self, range: &ShardRange) -> Result<Vec<ShardMember>>;

    async fn find_by_k8s_uid(&self, org_id: Uuid, k8s_uid: &str) -> Result<Option<ClusterEntry>>;

    /// Oldest DISCONNECTED cluster of the org that has no k8s uid yet.
    async fn oldest_unclaimed(&self, org_id: Uuid) -> Result<Option<ClusterEntry>>;

    /// Whether another cluster of the org already uses `name`.
    async fn name_taken(&self, org_id: Uuid, name: &str, excluding: Option<Uuid>) -> Result<bool>;

    /// Claim a cluster, only if it is still DISCONNECTED.
    async fn claim_cluster(&self, cluster_id: Uuid, claim: &ClaimUpdate) -> Result<bool>;

    async fn record_connected(&self, update: &ConnectUpdate) -> Result<bool>;

    async fn record_heartbeat(&self, update: &HeartbeatUpdate) -> Result<bool>;

    async fn update_config(&self, cluster_id: Uuid, update: &ConfigUpdate) -> Result<bool>;
}

/// Connect to the directory named by `database_url` and run migrations.
///
/// `postgres://` and `postgresql://` select PostgreSQL; `sqlite:` selects SQLite.
pub async fn connect(database_url: &str) -> Result<Arc<dyn DirectoryStore>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok(Arc::new(PostgresDirectory::connect(database_url).await?))
    } else if database_url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteDirectory::connect(database_url).await?))
    } else {
        Err(CoreError::invalid_argument(
            "database_url",
            "expected a postgres:// or sqlite: URL",
        ))
    }
}

// ============================================================================
// Row mapping shared by both backends
// ============================================================================

/// Columns selected by every cluster lookup.
pub(crate) const CLUSTER_COLUMNS: &str = r#"
    SELECT c.id, c.org_id, c.k8s_uid, c.cluster_name, c.cluster_version, c.project_name,
           c.created_at, i.status, i.address, i.jwt_signing_key, i.last_heartbeat,
           i.vizier_version, i.passthrough_enabled, i.auto_update_enabled, i.num_nodes,
           i.num_instrumented_nodes, i.control_plane_pod_statuses
    FROM vizier_clusters c
    JOIN vizier_cluster_info i ON i.cluster_id = c.id
"#;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ClusterRow {
    id: String,
    org_id: String,
    k8s_uid: String,
    cluster_name: Option<String>,
    cluster_version: String,
    project_name: String,
    created_at: DateTime<Utc>,
    status: String,
    address: String,
    jwt_signing_key: String,
    last_heartbeat: Option<DateTime<Utc>>,
    vizier_version: String,
    passthrough_enabled: bool,
    auto_update_enabled: bool,
    num_nodes: i32,
    num_instrumented_nodes: i32,
    control_plane_pod_statuses: String,
}

impl TryFrom<ClusterRow> for ClusterEntry {
    type Error = CoreError;

    fn try_from(row: ClusterRow) -> Result<Self> {
        Ok(ClusterEntry {
            cluster: ClusterRecord {
                id: parse_stored_uuid(&row.id)?,
                org_id: parse_stored_uuid(&row.org_id)?,
                k8s_uid: row.k8s_uid,
                name: row.cluster_name,
                cluster_version: row.cluster_version,
                project_name: row.project_name,
                created_at: row.created_at,
            },
            info: ClusterStatusRecord {
                status: row.status.parse()?,
                address: row.address,
                jwt_signing_key: row.jwt_signing_key,
                last_heartbeat: row.last_heartbeat,
                vizier_version: row.vizier_version,
                passthrough_enabled: row.passthrough_enabled,
                auto_update_enabled: row.auto_update_enabled,
                num_nodes: row.num_nodes,
                num_instrumented_nodes: row.num_instrumented_nodes,
                control_plane_pod_statuses: serde_json::from_str(&row.control_plane_pod_statuses)?,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ShardRow {
    id: String,
    org_id: String,
    k8s_uid: String,
}

impl TryFrom<ShardRow> for ShardMember {
    type Error = CoreError;

    fn try_from(row: ShardRow) -> Result<Self> {
        Ok(ShardMember {
            cluster_id: parse_stored_uuid(&row.id)?,
            org_id: parse_stored_uuid(&row.org_id)?,
            k8s_uid: row.k8s_uid,
        })
    }
}

pub(crate) fn into_entries(rows: Vec<ClusterRow>) -> Result<Vec<ClusterEntry>> {
    rows.into_iter().map(ClusterEntry::try_from).collect()
}

pub(crate) fn parse_stored_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| CoreError::Database {
        operation: "decode".to_string(),
        details: format!("stored id '{raw}' is not a UUID: {e}"),
    })
}

/// Tag a sqlx error with the directory operation that failed.
pub(crate) fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> CoreError {
    move |err| CoreError::Database {
        operation: operation.to_string(),
        details: err.to_string(),
    }
}

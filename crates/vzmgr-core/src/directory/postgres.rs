// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL directory operations for vzmgr-core.
//!
//! Provides the durable storage access functions for cluster identity and
//! status records. [`PostgresDirectory`] wraps them behind [`DirectoryStore`].

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::migrations;
use crate::shard::ShardRange;

use super::{
    CLUSTER_COLUMNS, ClaimUpdate, ClusterEntry, ClusterRow, ConfigUpdate, ConnectUpdate,
    DirectoryStore, HeartbeatUpdate, NewCluster, ShardMember, ShardRow, db_error, into_entries,
    parse_stored_uuid,
};

/// PostgreSQL-backed directory.
#[derive(Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    /// Create a new Postgres-backed directory from an existing, migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(db_error("connect"))?;

        migrations::run_postgres(&pool)
            .await
            .map_err(|e| CoreError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Cluster Operations
// ============================================================================

/// Insert a cluster and its DISCONNECTED status record.
pub async fn create_cluster(pool: &PgPool, cluster: &NewCluster) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO vizier_clusters
            (id, org_id, k8s_uid, cluster_name, cluster_version, project_name, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(cluster.id.to_string())
    .bind(cluster.org_id.to_string())
    .bind(&cluster.k8s_uid)
    .bind(&cluster.name)
    .bind(&cluster.cluster_version)
    .bind(&cluster.project_name)
    .bind(cluster.created_at)
    .execute(&mut *tx)
    .await
    .map_err(db_error("create_cluster"))?;

    sqlx::query("INSERT INTO vizier_cluster_info (cluster_id, status) VALUES ($1, 'DISCONNECTED')")
        .bind(cluster.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_error("create_cluster"))?;

    tx.commit().await?;
    Ok(())
}

/// Get a cluster by id.
pub async fn get_cluster(pool: &PgPool, cluster_id: Uuid) -> Result<Option<ClusterEntry>> {
    let row = sqlx::query_as::<_, ClusterRow>(&format!("{CLUSTER_COLUMNS} WHERE c.id = $1"))
        .bind(cluster_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(ClusterEntry::try_from).transpose()
}

/// Get every existing cluster among `cluster_ids`.
pub async fn get_clusters(pool: &PgPool, cluster_ids: &[Uuid]) -> Result<Vec<ClusterEntry>> {
    if cluster_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Postgres>::new(CLUSTER_COLUMNS);
    builder.push(" WHERE c.id IN (");
    let mut separated = builder.separated(", ");
    for id in cluster_ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let rows = builder.build_query_as::<ClusterRow>().fetch_all(pool).await?;
    into_entries(rows)
}

/// Cluster ids of an org, oldest first.
pub async fn list_cluster_ids_by_org(pool: &PgPool, org_id: Uuid) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM vizier_clusters WHERE org_id = $1 ORDER BY created_at, id",
    )
    .bind(org_id.to_string())
    .fetch_all(pool)
    .await?;

    ids.iter().map(|id| parse_stored_uuid(id)).collect()
}

/// Clusters whose shard lies in `range`. Records without a k8s uid have no
/// agent yet and are left out.
pub async fn list_by_shard(pool: &PgPool, range: &ShardRange) -> Result<Vec<ShardMember>> {
    let rows = sqlx::query_as::<_, ShardRow>(
        r#"
        SELECT id, org_id, k8s_uid
        FROM vizier_clusters
        WHERE substring(id from 35 for 2) BETWEEN $1 AND $2
          AND k8s_uid <> ''
        "#,
    )
    .bind(range.from_bound())
    .bind(range.to_bound())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ShardMember::try_from).collect()
}

pub async fn find_by_k8s_uid(
    pool: &PgPool,
    org_id: Uuid,
    k8s_uid: &str,
) -> Result<Option<ClusterEntry>> {
    let row = sqlx::query_as::<_, ClusterRow>(&format!(
        "{CLUSTER_COLUMNS} WHERE c.org_id = $1 AND c.k8s_uid = $2 AND c.k8s_uid <> ''"
    ))
    .bind(org_id.to_string())
    .bind(k8s_uid)
    .fetch_optional(pool)
    .await?;

    row.map(ClusterEntry::try_from).transpose()
}

pub async fn oldest_unclaimed(pool: &PgPool, org_id: Uuid) -> Result<Option<ClusterEntry>> {
    let row = sqlx::query_as::<_, ClusterRow>(&format!(
        r#"{CLUSTER_COLUMNS}
        WHERE c.org_id = $1 AND c.k8s_uid = '' AND i.status = 'DISCONNECTED'
        ORDER BY c.created_at, c.id
        LIMIT 1"#
    ))
    .bind(org_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(ClusterEntry::try_from).transpose()
}

pub async fn name_taken(
    pool: &PgPool,
    org_id: Uuid,
    name: &str,
    excluding: Option<Uuid>,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM vizier_clusters WHERE org_id = $1 AND cluster_name = $2 AND id <> $3",
    )
    .bind(org_id.to_string())
    .bind(name)
    .bind(excluding.map(|id| id.to_string()).unwrap_or_default())
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

// ============================================================================
// Status Operations
// ============================================================================

/// Claim a cluster if it is still DISCONNECTED.
pub async fn claim_cluster(pool: &PgPool, cluster_id: Uuid, claim: &ClaimUpdate) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vizier_clusters
        SET k8s_uid = $1, cluster_name = $2, cluster_version = $3
        WHERE id = $4
          AND EXISTS (
              SELECT 1 FROM vizier_cluster_info
              WHERE cluster_id = $4 AND status = 'DISCONNECTED'
          )
        "#,
    )
    .bind(&claim.k8s_uid)
    .bind(&claim.name)
    .bind(&claim.cluster_version)
    .bind(cluster_id.to_string())
    .execute(pool)
    .await
    .map_err(db_error("claim_cluster"))?;

    Ok(result.rows_affected() == 1)
}

pub async fn record_connected(pool: &PgPool, update: &ConnectUpdate) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE vizier_cluster_info
        SET status = $1, jwt_signing_key = $2, vizier_version = $3, address = $4,
            last_heartbeat = $5
        WHERE cluster_id = $6
        "#,
    )
    .bind(update.status.as_str())
    .bind(&update.jwt_signing_key)
    .bind(&update.vizier_version)
    .bind(&update.address)
    .bind(update.connected_at)
    .bind(update.cluster_id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(db_error("record_connected"))?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        r#"
        UPDATE vizier_clusters
        SET k8s_uid = COALESCE(NULLIF($1, ''), k8s_uid), cluster_version = $2
        WHERE id = $3
        "#,
    )
    .bind(&update.k8s_uid)
    .bind(&update.cluster_version)
    .bind(update.cluster_id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(db_error("record_connected"))?;

    tx.commit().await?;
    Ok(true)
}

pub async fn record_heartbeat(pool: &PgPool, update: &HeartbeatUpdate) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vizier_cluster_info
        SET status = $1, address = $2, last_heartbeat = $3, control_plane_pod_statuses = $4,
            num_nodes = $5, num_instrumented_nodes = $6, auto_update_enabled = $7
        WHERE cluster_id = $8
        "#,
    )
    .bind(update.status.as_str())
    .bind(&update.address)
    .bind(update.last_heartbeat)
    .bind(serde_json::to_string(&update.pod_statuses)?)
    .bind(update.num_nodes)
    .bind(update.num_instrumented_nodes)
    .bind(update.auto_update_enabled)
    .bind(update.cluster_id.to_string())
    .execute(pool)
    .await
    .map_err(db_error("record_heartbeat"))?;

    Ok(result.rows_affected() == 1)
}

pub async fn update_config(pool: &PgPool, cluster_id: Uuid, update: &ConfigUpdate) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vizier_cluster_info
        SET passthrough_enabled = COALESCE($1, passthrough_enabled),
            auto_update_enabled = COALESCE($2, auto_update_enabled)
        WHERE cluster_id = $3
        "#,
    )
    .bind(update.passthrough_enabled)
    .bind(update.auto_update_enabled)
    .bind(cluster_id.to_string())
    .execute(pool)
    .await
    .map_err(db_error("update_config"))?;

    Ok(result.rows_affected() == 1)
}

#[async_trait::async_trait]
impl DirectoryStore for PostgresDirectory {
    async fn create_cluster(&self, cluster: &NewCluster) -> Result<()> {
        create_cluster(&self.pool, cluster).await
    }

    async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<ClusterEntry>> {
        get_cluster(&self.pool, cluster_id).await
    }

    async fn get_clusters(&self, cluster_ids: &[Uuid]) -> Result<Vec<ClusterEntry>> {
        get_clusters(&self.pool, cluster_ids).await
    }

    async fn list_cluster_ids_by_org(&self, org_id: Uuid) -> Result<Vec<Uuid>> {
        list_cluster_ids_by_org(&self.pool, org_id).await
    }

    async fn list_by_shard(&self, range: &ShardRange) -> Result<Vec<ShardMember>> {
        list_by_shard(&self.pool, range).await
    }

    async fn find_by_k8s_uid(&self, org_id: Uuid, k8s_uid: &str) -> Result<Option<ClusterEntry>> {
        find_by_k8s_uid(&self.pool, org_id, k8s_uid).await
    }

    async fn oldest_unclaimed(&self, org_id: Uuid) -> Result<Option<ClusterEntry>> {
        oldest_unclaimed(&self.pool, org_id).await
    }

    async fn name_taken(&self, org_id: Uuid, name: &str, excluding: Option<Uuid>) -> Result<bool> {
        name_taken(&self.pool, org_id, name, excluding).await
    }

    async fn claim_cluster(&self, cluster_id: Uuid, claim: &ClaimUpdate) -> Result<bool> {
        claim_cluster(&self.pool, cluster_id, claim).await
    }

    async fn record_connected(&self, update: &ConnectUpdate) -> Result<bool> {
        record_connected(&self.pool, update).await
    }

    async fn record_heartbeat(&self, update: &HeartbeatUpdate) -> Result<bool> {
        record_heartbeat(&self.pool, update).await
    }

    async fn update_config(&self, cluster_id: Uuid, update: &ConfigUpdate) -> Result<bool> {
        update_config(&self.pool, cluster_id, update).await
    }
}

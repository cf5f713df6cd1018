// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed directory implementation.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::migrations;
use crate::shard::ShardRange;

use super::{
    CLUSTER_COLUMNS, ClaimUpdate, ClusterEntry, ClusterRow, ConfigUpdate, ConnectUpdate,
    DirectoryStore, HeartbeatUpdate, NewCluster, ShardMember, ShardRow, db_error, into_entries,
    parse_stored_uuid,
};

/// SQLite-backed directory.
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    /// Create a new SQLite directory from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and run migrations.
    ///
    /// ```ignore
    /// let directory = SqliteDirectory::connect("sqlite:.data/vzmgr.db").await?;
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_error("connect"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_error("connect"))?;

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| CoreError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl DirectoryStore for SqliteDirectory {
    async fn create_cluster(&self, cluster: &NewCluster) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO vizier_clusters
                (id, org_id, k8s_uid, cluster_name, cluster_version, project_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
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

        sqlx::query(
            "INSERT INTO vizier_cluster_info (cluster_id, status) VALUES (?, 'DISCONNECTED')",
        )
        .bind(cluster.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_error("create_cluster"))?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<ClusterEntry>> {
        let row = sqlx::query_as::<_, ClusterRow>(&format!("{CLUSTER_COLUMNS} WHERE c.id = ?"))
            .bind(cluster_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ClusterEntry::try_from).transpose()
    }

    async fn get_clusters(&self, cluster_ids: &[Uuid]) -> Result<Vec<ClusterEntry>> {
        if cluster_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(CLUSTER_COLUMNS);
        builder.push(" WHERE c.id IN (");
        let mut separated = builder.separated(", ");
        for id in cluster_ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<ClusterRow>()
            .fetch_all(&self.pool)
            .await?;
        into_entries(rows)
    }

    async fn list_cluster_ids_by_org(&self, org_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM vizier_clusters WHERE org_id = ? ORDER BY created_at, id",
        )
        .bind(org_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        ids.iter().map(|id| parse_stored_uuid(id)).collect()
    }

    async fn list_by_shard(&self, range: &ShardRange) -> Result<Vec<ShardMember>> {
        let rows = sqlx::query_as::<_, ShardRow>(
            r#"
            SELECT id, org_id, k8s_uid
            FROM vizier_clusters
            WHERE substr(id, 35, 2) BETWEEN ? AND ?
              AND k8s_uid <> ''
            "#,
        )
        .bind(range.from_bound())
        .bind(range.to_bound())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ShardMember::try_from).collect()
    }

    async fn find_by_k8s_uid(&self, org_id: Uuid, k8s_uid: &str) -> Result<Option<ClusterEntry>> {
        let row = sqlx::query_as::<_, ClusterRow>(&format!(
            "{CLUSTER_COLUMNS} WHERE c.org_id = ? AND c.k8s_uid = ? AND c.k8s_uid <> ''"
        ))
        .bind(org_id.to_string())
        .bind(k8s_uid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClusterEntry::try_from).transpose()
    }

    async fn oldest_unclaimed(&self, org_id: Uuid) -> Result<Option<ClusterEntry>> {
        let row = sqlx::query_as::<_, ClusterRow>(&format!(
            r#"{CLUSTER_COLUMNS}
            WHERE c.org_id = ? AND c.k8s_uid = '' AND i.status = 'DISCONNECTED'
            ORDER BY c.created_at, c.id
            LIMIT 1"#
        ))
        .bind(org_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClusterEntry::try_from).transpose()
    }

    async fn name_taken(&self, org_id: Uuid, name: &str, excluding: Option<Uuid>) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vizier_clusters WHERE org_id = ? AND cluster_name = ? AND id <> ?",
        )
        .bind(org_id.to_string())
        .bind(name)
        .bind(excluding.map(|id| id.to_string()).unwrap_or_default())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn claim_cluster(&self, cluster_id: Uuid, claim: &ClaimUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE vizier_clusters
            SET k8s_uid = ?1, cluster_name = ?2, cluster_version = ?3
            WHERE id = ?4
              AND EXISTS (
                  SELECT 1 FROM vizier_cluster_info
                  WHERE cluster_id = ?4 AND status = 'DISCONNECTED'
              )
            "#,
        )
        .bind(&claim.k8s_uid)
        .bind(&claim.name)
        .bind(&claim.cluster_version)
        .bind(cluster_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error("claim_cluster"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_connected(&self, update: &ConnectUpdate) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE vizier_cluster_info
            SET status = ?, jwt_signing_key = ?, vizier_version = ?, address = ?, last_heartbeat = ?
            WHERE cluster_id = ?
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
            SET k8s_uid = COALESCE(NULLIF(?, ''), k8s_uid), cluster_version = ?
            WHERE id = ?
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

    async fn record_heartbeat(&self, update: &HeartbeatUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE vizier_cluster_info
            SET status = ?, address = ?, last_heartbeat = ?, control_plane_pod_statuses = ?,
                num_nodes = ?, num_instrumented_nodes = ?, auto_update_enabled = ?
            WHERE cluster_id = ?
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
        .execute(&self.pool)
        .await
        .map_err(db_error("record_heartbeat"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_config(&self, cluster_id: Uuid, update: &ConfigUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE vizier_cluster_info
            SET passthrough_enabled = COALESCE(?, passthrough_enabled),
                auto_update_enabled = COALESCE(?, auto_update_enabled)
            WHERE cluster_id = ?
            "#,
        )
        .bind(update.passthrough_enabled)
        .bind(update.auto_update_enabled)
        .bind(cluster_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error("update_config"))?;

        Ok(result.rows_affected() == 1)
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixtures and mock collaborators shared by unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;
use vzmgr_protocol::MemoryTransport;

use crate::controller::{AuthContext, ControllerState};
use crate::crypto::AesGcmEncryptor;
use crate::directory::{DirectoryStore, NewCluster, SqliteDirectory};
use crate::error::{CoreError, Result};
use crate::migrations;
use crate::resolver::{AddressResolver, SslCerts};
use crate::updater::{UpdateAck, UpdateTrigger};

/// Create an in-memory SQLite directory for testing.
pub async fn sqlite_directory() -> Arc<dyn DirectoryStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");

    Arc::new(SqliteDirectory::new(pool))
}

pub fn test_encryptor() -> AesGcmEncryptor {
    AesGcmEncryptor::from_key(&"42".repeat(32)).expect("valid test key")
}

/// Insert a DISCONNECTED cluster and return its id.
pub async fn seed_cluster(
    directory: &dyn DirectoryStore,
    org_id: Uuid,
    k8s_uid: &str,
    name: &str,
) -> Uuid {
    seed_cluster_with_id(directory, Uuid::new_v4(), org_id, k8s_uid, name, 0).await
}

/// Insert a cluster with a fixed id; `age_secs` moves `created_at` back.
pub async fn seed_cluster_with_id(
    directory: &dyn DirectoryStore,
    id: Uuid,
    org_id: Uuid,
    k8s_uid: &str,
    name: &str,
    age_secs: i64,
) -> Uuid {
    directory
        .create_cluster(&NewCluster {
            id,
            org_id,
            k8s_uid: k8s_uid.to_string(),
            name: (!name.is_empty()).then(|| name.to_string()),
            cluster_version: String::new(),
            project_name: "default".to_string(),
            created_at: Utc::now() - Duration::seconds(age_secs),
        })
        .await
        .expect("Failed to seed cluster");
    id
}

// ============================================================================
// Mock collaborators
// ============================================================================

/// Records every call made by the controller.
#[derive(Debug, Default)]
pub struct RecordingUpdater {
    pub up_to_date: bool,
    pub version_checks: Mutex<Vec<Uuid>>,
    pub updates: Mutex<Vec<(Uuid, String, bool)>>,
    pub queued: Mutex<Vec<Uuid>>,
}

impl RecordingUpdater {
    pub fn new(up_to_date: bool) -> Self {
        Self {
            up_to_date,
            ..Default::default()
        }
    }

    pub fn version_checks(&self) -> Vec<Uuid> {
        self.version_checks.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(Uuid, String, bool)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn queued(&self) -> Vec<Uuid> {
        self.queued.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateTrigger for RecordingUpdater {
    async fn version_up_to_date(&self, cluster_id: Uuid) -> bool {
        self.version_checks.lock().unwrap().push(cluster_id);
        self.up_to_date
    }

    async fn update_or_install(
        &self,
        cluster_id: Uuid,
        version: &str,
        redeploy_etcd: bool,
    ) -> Result<UpdateAck> {
        self.updates
            .lock()
            .unwrap()
            .push((cluster_id, version.to_string(), redeploy_etcd));
        Ok(UpdateAck {
            update_started: true,
            version: version.to_string(),
        })
    }

    fn add_to_update_queue(&self, cluster_id: Uuid) {
        self.queued.lock().unwrap().push(cluster_id);
    }
}

/// Resolver returning fixed answers; `None` makes the call fail.
#[derive(Debug, Default)]
pub struct StaticResolver {
    pub dns_name: Option<String>,
    pub certs: Option<SslCerts>,
    pub resolved: Mutex<Vec<(Uuid, String)>>,
}

impl StaticResolver {
    pub fn resolving_to(dns_name: &str) -> Self {
        Self {
            dns_name: Some(dns_name.to_string()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn resolved(&self) -> Vec<(Uuid, String)> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve_address(&self, cluster_id: Uuid, ip: &str) -> Result<String> {
        self.resolved
            .lock()
            .unwrap()
            .push((cluster_id, ip.to_string()));
        self.dns_name
            .clone()
            .ok_or_else(|| CoreError::internal("Could not get DNS address"))
    }

    async fn ssl_certs(&self, cluster_id: Uuid) -> Result<SslCerts> {
        self.certs
            .clone()
            .ok_or_else(|| CoreError::not_found(cluster_id))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A controller wired to an in-memory directory, bus and mocks.
pub struct Harness {
    pub state: ControllerState,
    pub directory: Arc<dyn DirectoryStore>,
    pub updater: Arc<RecordingUpdater>,
    pub resolver: Arc<StaticResolver>,
    pub bus: Arc<MemoryTransport>,
}

impl Harness {
    pub async fn new(resolver: StaticResolver, updater: RecordingUpdater) -> Self {
        let directory = sqlite_directory().await;
        let updater = Arc::new(updater);
        let resolver = Arc::new(resolver);
        let bus = Arc::new(MemoryTransport::default());

        let state = ControllerState::new(
            directory.clone(),
            Arc::new(test_encryptor()),
            resolver.clone(),
            updater.clone(),
        )
        .with_bus(bus.clone());

        Self {
            state,
            directory,
            updater,
            resolver,
            bus,
        }
    }

    /// Harness with a resolving resolver and an up-to-date updater.
    pub async fn default_mocks() -> Self {
        Self::new(
            StaticResolver::resolving_to("abc.clusters.dev.withpixie.dev"),
            RecordingUpdater::new(true),
        )
        .await
    }
}

pub fn auth(org_id: Uuid) -> AuthContext {
    AuthContext::new(org_id, Uuid::new_v4())
}

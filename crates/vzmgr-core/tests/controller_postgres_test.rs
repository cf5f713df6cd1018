// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Controller lifecycle against PostgreSQL.
//!
//! Skipped unless `TEST_DATABASE_URL` points at a PostgreSQL database.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use vzmgr_core::agent_handlers::{handle_vizier_connected, handle_vizier_heartbeat};
use vzmgr_core::controller::{AuthContext, ControllerState};
use vzmgr_core::crypto::AesGcmEncryptor;
use vzmgr_core::directory::{DirectoryStore, NewCluster, PostgresDirectory};
use vzmgr_core::management_handlers::{
    VizierConfigUpdate, handle_get_vizier_connection_info, handle_get_vizier_info,
    handle_get_viziers_by_org, handle_get_viziers_by_shard, handle_update_vizier_config,
};
use vzmgr_core::provisioning::{ProvisionRequest, handle_provision_or_claim_vizier};
use vzmgr_core::resolver::DomainAddressResolver;
use vzmgr_core::shard::shard_of;
use vzmgr_core::status::ClusterStatus;
use vzmgr_core::token::verify_cluster_token;
use vzmgr_core::updater::BusUpdater;
use vzmgr_protocol::MemoryTransport;
use vzmgr_protocol::messages::{
    AgentStatus, RegisterVizierRequest, VizierClusterInfo, VizierHeartbeat,
};

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

async fn create_test_state() -> Option<(ControllerState, PgPool)> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let directory = Arc::new(PostgresDirectory::connect(&database_url).await.ok()?);
    let pool = directory.pool().clone();

    let bus = Arc::new(MemoryTransport::default());
    let updater = BusUpdater::new(directory.clone(), bus.clone(), None);
    let encryptor = AesGcmEncryptor::from_key(&"42".repeat(32)).ok()?;

    let state = ControllerState::new(
        directory,
        Arc::new(encryptor),
        Arc::new(DomainAddressResolver::new("dev.withpixie.dev")),
        Arc::new(updater),
    )
    .with_bus(bus);

    Some((state, pool))
}

async fn cleanup_org(pool: &PgPool, org_id: Uuid) {
    sqlx::query("DELETE FROM vizier_clusters WHERE org_id = $1")
        .bind(org_id.to_string())
        .execute(pool)
        .await
        .ok();
}

#[tokio::test]
async fn test_cluster_lifecycle() {
    skip_if_no_db!();
    let Some((state, pool)) = create_test_state().await else {
        return;
    };

    let org_id = Uuid::new_v4();
    let auth = AuthContext::new(org_id, Uuid::new_v4());
    let k8s_uid = format!("uid-{}", Uuid::new_v4());

    // Provision, then claim again with the same uid.
    let request = ProvisionRequest {
        k8s_uid: k8s_uid.clone(),
        cluster_name: "pg_cluster".to_string(),
        cluster_version: "1.27".to_string(),
    };
    let id = handle_provision_or_claim_vizier(&state, &auth, request.clone())
        .await
        .unwrap();
    let again = handle_provision_or_claim_vizier(&state, &auth, request.clone())
        .await
        .unwrap();
    assert_eq!(id, again);

    // Connect.
    let ack = handle_vizier_connected(
        &state,
        RegisterVizierRequest {
            vizier_id: id,
            jwt_key: "pg-signing-key".to_string(),
            address: "10.0.0.1".to_string(),
            cluster_info: VizierClusterInfo {
                cluster_uid: k8s_uid.clone(),
                cluster_version: "1.27".to_string(),
                vizier_version: "0.14.0".to_string(),
            },
        },
    )
    .await
    .unwrap();
    assert_eq!(ack.status, vzmgr_protocol::messages::AckStatus::Ok);

    // Now active, so a new claim must fail without touching it.
    let err = handle_provision_or_claim_vizier(&state, &auth, request)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ALREADY_ACTIVE");

    // Heartbeat.
    handle_vizier_heartbeat(
        &state,
        VizierHeartbeat {
            vizier_id: id,
            address: "10.0.0.1".to_string(),
            port: 443,
            status: AgentStatus::Healthy,
            num_nodes: 5,
            num_instrumented_nodes: 4,
            ..Default::default()
        },
    )
    .await;

    let info = handle_get_vizier_info(&state, &auth, &id.to_string())
        .await
        .unwrap();
    assert_eq!(info.status, ClusterStatus::Healthy);
    assert_eq!(info.cluster_name, "pg_cluster");
    assert_eq!(info.cluster_uid, k8s_uid);
    assert_eq!(info.num_nodes, 5);
    assert!(info.config.auto_update_enabled);

    // Management paths.
    let ids = handle_get_viziers_by_org(&state, &auth, &org_id.to_string())
        .await
        .unwrap();
    assert_eq!(ids, vec![id]);

    let shard = format!("{:02x}", shard_of(&id));
    let members = handle_get_viziers_by_shard(&state, &shard, &shard)
        .await
        .unwrap();
    assert!(members.iter().any(|m| m.cluster_id == id && m.org_id == org_id));

    handle_update_vizier_config(
        &state,
        &auth,
        &id.to_string(),
        VizierConfigUpdate {
            passthrough_enabled: Some(true),
            auto_update_enabled: Some(false),
        },
    )
    .await
    .unwrap();
    let info = handle_get_vizier_info(&state, &auth, &id.to_string())
        .await
        .unwrap();
    assert!(info.config.passthrough_enabled);
    assert!(!info.config.auto_update_enabled);

    let conn = handle_get_vizier_connection_info(&state, &auth, &id.to_string())
        .await
        .unwrap();
    let label = DomainAddressResolver::cluster_label(id);
    assert_eq!(
        conn.ip_address,
        format!("https://{label}.clusters.dev.withpixie.dev:443")
    );
    let claims = verify_cluster_token("pg-signing-key", &conn.token).unwrap();
    assert_eq!(claims.cluster_id, id);

    cleanup_org(&pool, org_id).await;
}

#[tokio::test]
async fn test_claims_oldest_unclaimed_record() {
    skip_if_no_db!();
    let Some((state, pool)) = create_test_state().await else {
        return;
    };

    let org_id = Uuid::new_v4();
    let auth = AuthContext::new(org_id, Uuid::new_v4());

    // Two empty-uid records, the first one older.
    let now = Utc::now();
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
    for (id, name, age) in [(first, "first", 60), (second, "second", 0)] {
        state
            .directory
            .create_cluster(&NewCluster {
                id,
                org_id,
                k8s_uid: String::new(),
                name: Some(name.to_string()),
                cluster_version: String::new(),
                project_name: "default".to_string(),
                created_at: now - Duration::seconds(age),
            })
            .await
            .unwrap();
    }

    let claimed = handle_provision_or_claim_vizier(
        &state,
        &auth,
        ProvisionRequest {
            k8s_uid: "fresh-uid".to_string(),
            cluster_name: "claimed".to_string(),
            cluster_version: "1.28".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(claimed, first);

    let info = handle_get_vizier_info(&state, &auth, &first.to_string())
        .await
        .unwrap();
    assert_eq!(info.cluster_uid, "fresh-uid");
    assert_eq!(info.cluster_version, "1.28");
    assert_eq!(info.cluster_name, "claimed");

    let untouched = handle_get_vizier_info(&state, &auth, &second.to_string())
        .await
        .unwrap();
    assert_eq!(untouched.cluster_uid, "");

    cleanup_org(&pool, org_id).await;
}

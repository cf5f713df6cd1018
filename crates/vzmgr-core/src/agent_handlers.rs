// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent protocol handlers for vzmgr-core.
//!
//! These handlers process messages that clusters send over the bridge:
//! registration on connect, periodic heartbeats and TLS material requests.

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use vzmgr_protocol::messages::{
    ClusterConnected, RegisterVizierAck, RegisterVizierRequest, SslCertRequest, SslCertResponse,
    VizierHeartbeat,
};
use vzmgr_protocol::topic::CLUSTER_CONNECTED_TOPIC;

use crate::controller::ControllerState;
use crate::crypto::seal_signing_key;
use crate::directory::{ConnectUpdate, HeartbeatUpdate};
use crate::error::{CoreError, Result};
use crate::status::StatusEvent;

// ============================================================================
// Registration
// ============================================================================

/// Handle an agent (re)connecting.
///
/// Stores the agent's signing key (salted and encrypted), its reported
/// versions and address. A live agent (one that reported an address) is
/// announced on the `VizierConnected` bus topic.
///
/// # Errors
///
/// Returns `NotFound` if the cluster was never provisioned.
#[instrument(skip(state, request), fields(cluster_id = %request.vizier_id))]
pub async fn handle_vizier_connected(
    state: &ControllerState,
    request: RegisterVizierRequest,
) -> Result<RegisterVizierAck> {
    let cluster_id = request.vizier_id;
    let entry = state
        .directory
        .get_cluster(cluster_id)
        .await?
        .ok_or_else(|| CoreError::not_found(cluster_id))?;

    let live = !request.address.is_empty();
    let status = entry.info.status.transition(StatusEvent::Connected { live });
    let jwt_signing_key = seal_signing_key(state.encryptor.as_ref(), &request.jwt_key)?;

    let info = request.cluster_info;
    let updated = state
        .directory
        .record_connected(&ConnectUpdate {
            cluster_id,
            status,
            jwt_signing_key,
            k8s_uid: info.cluster_uid.clone(),
            cluster_version: info.cluster_version,
            vizier_version: info.vizier_version,
            address: request.address,
            connected_at: Utc::now(),
        })
        .await?;
    if !updated {
        return Err(CoreError::not_found(cluster_id));
    }

    info!(%status, "Cluster connected");

    if live {
        let k8s_uid = if info.cluster_uid.is_empty() {
            entry.cluster.k8s_uid
        } else {
            info.cluster_uid
        };
        publish_cluster_connected(state, entry.cluster.org_id, cluster_id, k8s_uid).await;
    }

    Ok(RegisterVizierAck::ok())
}

async fn publish_cluster_connected(
    state: &ControllerState,
    org_id: Uuid,
    cluster_id: Uuid,
    k8s_uid: String,
) {
    let Some(bus) = state.bus.as_ref() else {
        return;
    };

    let event = ClusterConnected {
        org_id,
        vizier_id: cluster_id,
        k8s_uid,
    };
    let payload = match serde_json::to_vec(&event) {
        Ok(payload) => Bytes::from(payload),
        Err(e) => {
            error!(error = %e, "Failed to encode ClusterConnected");
            return;
        }
    };

    if let Err(e) = bus.publish(CLUSTER_CONNECTED_TOPIC, payload).await {
        warn!(error = %e, "Failed to publish ClusterConnected");
    }
}

// ============================================================================
// Heartbeats
// ============================================================================

/// Handle a heartbeat. Fire-and-forget: failures are logged and the
/// message is dropped.
#[instrument(
    skip(state, heartbeat),
    fields(cluster_id = %heartbeat.vizier_id, seq = heartbeat.sequence_number)
)]
pub async fn handle_vizier_heartbeat(state: &ControllerState, heartbeat: VizierHeartbeat) {
    if let Err(e) = apply_heartbeat(state, heartbeat).await {
        error!(error = %e, code = e.error_code(), "Failed to process heartbeat");
    }
}

async fn apply_heartbeat(state: &ControllerState, heartbeat: VizierHeartbeat) -> Result<()> {
    let cluster_id = heartbeat.vizier_id;
    let Some(entry) = state.directory.get_cluster(cluster_id).await? else {
        warn!("Heartbeat from unknown cluster");
        return Ok(());
    };

    let has_address = !heartbeat.address.is_empty();
    let address = if has_address {
        resolve_address(state, cluster_id, &heartbeat.address, heartbeat.port).await
    } else {
        String::new()
    };

    if heartbeat.bootstrap_mode {
        match state
            .updater
            .update_or_install(cluster_id, &heartbeat.bootstrap_version, false)
            .await
        {
            Ok(ack) => info!(version = %ack.version, "Bootstrap install triggered"),
            Err(e) => error!(error = %e, "Failed to trigger bootstrap install"),
        }
    }

    let status = entry.info.status.transition(StatusEvent::Heartbeat {
        declared: heartbeat.status,
        has_address,
        bootstrap: heartbeat.bootstrap_mode,
    });
    let auto_update_enabled = !heartbeat.disable_auto_update;

    let updated = state
        .directory
        .record_heartbeat(&HeartbeatUpdate {
            cluster_id,
            status,
            address,
            last_heartbeat: Utc::now(),
            pod_statuses: heartbeat.pod_statuses,
            num_nodes: heartbeat.num_nodes,
            num_instrumented_nodes: heartbeat.num_instrumented_nodes,
            auto_update_enabled,
        })
        .await?;
    if !updated {
        warn!("Cluster status record missing, heartbeat dropped");
        return Ok(());
    }

    debug!(%status, "Heartbeat recorded");

    if heartbeat.bootstrap_mode || !auto_update_enabled {
        return Ok(());
    }
    if !state.updater.version_up_to_date(cluster_id).await {
        state.updater.add_to_update_queue(cluster_id);
    }

    Ok(())
}

/// `<dns name>:<port>`, or `<ip>:<port>` when the resolver fails.
async fn resolve_address(state: &ControllerState, cluster_id: Uuid, ip: &str, port: i32) -> String {
    match state.resolver.resolve_address(cluster_id, ip).await {
        Ok(name) => format!("{name}:{port}"),
        Err(e) => {
            warn!(ip, error = %e, "Could not resolve cluster address, using IP");
            format!("{ip}:{port}")
        }
    }
}

// ============================================================================
// TLS material
// ============================================================================

/// Handle a cluster asking for its TLS key and certificate.
#[instrument(skip(state, request), fields(cluster_id = %request.vizier_id))]
pub async fn handle_ssl_request(
    state: &ControllerState,
    request: SslCertRequest,
) -> Result<SslCertResponse> {
    let certs = state.resolver.ssl_certs(request.vizier_id).await?;
    debug!("Serving TLS material");
    Ok(SslCertResponse {
        key: certs.key,
        cert: certs.cert,
    })
}

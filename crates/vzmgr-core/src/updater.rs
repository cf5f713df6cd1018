// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Update trigger for vzmgr-core.
//!
//! The controller never performs an update itself. It asks an
//! [`UpdateTrigger`] to either start one right away (bootstrap heartbeats,
//! explicit requests) or to enqueue the cluster for a background check.
//!
//! [`BusUpdater`] sends the update request to the cluster over the bus.
//! [`QueuedUpdater`] adds a bounded queue in front of it, drained by an
//! [`UpdateWorker`] task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use vzmgr_protocol::messages::UpdateOrInstallRequest;
use vzmgr_protocol::{Envelope, MessageKind, Topic, Transport};

use crate::directory::DirectoryStore;
use crate::error::{CoreError, Result};

/// Acknowledgement of an update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAck {
    pub update_started: bool,
    /// Version the cluster was asked to run.
    pub version: String,
}

/// Narrow interface to the update executor.
#[async_trait]
pub trait UpdateTrigger: Send + Sync {
    /// Whether the cluster already runs the target version.
    async fn version_up_to_date(&self, cluster_id: Uuid) -> bool;

    /// Start an update (or install) now. An empty `version` means latest.
    async fn update_or_install(
        &self,
        cluster_id: Uuid,
        version: &str,
        redeploy_etcd: bool,
    ) -> Result<UpdateAck>;

    /// Schedule a background update; never blocks.
    fn add_to_update_queue(&self, cluster_id: Uuid);
}

// ============================================================================
// Bus dispatcher
// ============================================================================

/// Sends update requests to clusters on `c2v.<id>.update`.
pub struct BusUpdater {
    directory: Arc<dyn DirectoryStore>,
    bus: Arc<dyn Transport>,
    latest_version: Option<String>,
}

impl std::fmt::Debug for BusUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusUpdater")
            .field("latest_version", &self.latest_version)
            .finish_non_exhaustive()
    }
}

impl BusUpdater {
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        bus: Arc<dyn Transport>,
        latest_version: Option<String>,
    ) -> Self {
        Self {
            directory,
            bus,
            latest_version,
        }
    }

    pub fn latest_version(&self) -> Option<&str> {
        self.latest_version.as_deref()
    }
}

/// `current >= latest` by semver; plain equality when either is not semver.
pub fn is_up_to_date(current: &str, latest: &str) -> bool {
    match (
        semver::Version::parse(current.trim_start_matches('v')),
        semver::Version::parse(latest.trim_start_matches('v')),
    ) {
        (Ok(current), Ok(latest)) => current >= latest,
        _ => current == latest,
    }
}

#[async_trait]
impl UpdateTrigger for BusUpdater {
    async fn version_up_to_date(&self, cluster_id: Uuid) -> bool {
        let Some(latest) = self.latest_version.as_deref() else {
            return true;
        };

        match self.directory.get_cluster(cluster_id).await {
            Ok(Some(entry)) => is_up_to_date(&entry.info.vizier_version, latest),
            Ok(None) => true,
            Err(e) => {
                warn!(%cluster_id, error = %e, "Failed to look up cluster version");
                true
            }
        }
    }

    #[instrument(skip(self), fields(cluster_id = %cluster_id))]
    async fn update_or_install(
        &self,
        cluster_id: Uuid,
        version: &str,
        redeploy_etcd: bool,
    ) -> Result<UpdateAck> {
        let version = match (version.trim(), self.latest_version.as_deref()) {
            ("", Some(latest)) => latest.to_string(),
            ("", None) => {
                return Err(CoreError::invalid_argument(
                    "version",
                    "no version requested and no latest version configured",
                ));
            }
            (requested, _) => requested.to_string(),
        };

        if self.directory.get_cluster(cluster_id).await?.is_none() {
            return Err(CoreError::not_found(cluster_id));
        }

        let request = UpdateOrInstallRequest {
            vizier_id: cluster_id,
            version: version.clone(),
            redeploy_etcd,
        };
        let envelope = Envelope::new(cluster_id, MessageKind::Update, &request)?;
        let topic = Topic::outbound(cluster_id, MessageKind::Update.as_str());
        self.bus
            .publish(&topic.to_string(), envelope.to_bytes()?)
            .await?;

        info!(%version, redeploy_etcd, "Update requested");
        Ok(UpdateAck {
            update_started: true,
            version,
        })
    }

    fn add_to_update_queue(&self, cluster_id: Uuid) {
        debug!(%cluster_id, "BusUpdater has no queue, ignoring enqueue");
    }
}

// ============================================================================
// Queue
// ============================================================================

/// [`BusUpdater`] with a bounded background queue.
///
/// A cluster sits in the queue at most once; repeated heartbeats of an
/// outdated cluster do not pile up.
pub struct QueuedUpdater {
    dispatcher: Arc<BusUpdater>,
    queue: mpsc::Sender<Uuid>,
    pending: Arc<Mutex<HashSet<Uuid>>>,
}

impl std::fmt::Debug for QueuedUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedUpdater")
            .field("dispatcher", &self.dispatcher)
            .field("capacity", &self.queue.max_capacity())
            .finish()
    }
}

impl QueuedUpdater {
    /// Create the updater and the worker that drains its queue.
    pub fn new(dispatcher: BusUpdater, capacity: usize) -> (Self, UpdateWorker) {
        let dispatcher = Arc::new(dispatcher);
        let (queue, rx) = mpsc::channel(capacity);
        let pending = Arc::new(Mutex::new(HashSet::new()));

        let worker = UpdateWorker {
            dispatcher: dispatcher.clone(),
            rx,
            pending: pending.clone(),
        };

        (
            Self {
                dispatcher,
                queue,
                pending,
            },
            worker,
        )
    }

    /// Clusters currently waiting in the queue.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl UpdateTrigger for QueuedUpdater {
    async fn version_up_to_date(&self, cluster_id: Uuid) -> bool {
        self.dispatcher.version_up_to_date(cluster_id).await
    }

    async fn update_or_install(
        &self,
        cluster_id: Uuid,
        version: &str,
        redeploy_etcd: bool,
    ) -> Result<UpdateAck> {
        self.dispatcher
            .update_or_install(cluster_id, version, redeploy_etcd)
            .await
    }

    fn add_to_update_queue(&self, cluster_id: Uuid) {
        let Ok(mut pending) = self.pending.lock() else {
            error!(%cluster_id, "Update queue lock poisoned");
            return;
        };
        if !pending.insert(cluster_id) {
            return;
        }

        match self.queue.try_send(cluster_id) {
            Ok(()) => debug!(%cluster_id, "Cluster queued for update"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                pending.remove(&cluster_id);
                warn!(%cluster_id, "Update queue full, dropping request");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                pending.remove(&cluster_id);
                warn!(%cluster_id, "Update worker stopped, dropping request");
            }
        }
    }
}

/// Drains the update queue.
pub struct UpdateWorker {
    dispatcher: Arc<BusUpdater>,
    rx: mpsc::Receiver<Uuid>,
    pending: Arc<Mutex<HashSet<Uuid>>>,
}

impl std::fmt::Debug for UpdateWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateWorker").finish_non_exhaustive()
    }
}

impl UpdateWorker {
    /// Process queued clusters until shutdown or until every sender is gone.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Update worker started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }

                next = self.rx.recv() => {
                    let Some(cluster_id) = next else {
                        break;
                    };
                    self.process(cluster_id).await;
                }
            }
        }

        info!("Update worker stopped");
    }

    async fn process(&self, cluster_id: Uuid) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&cluster_id);
        }

        // The cluster may have been updated while it waited.
        if self.dispatcher.version_up_to_date(cluster_id).await {
            debug!(%cluster_id, "Cluster already up to date");
            return;
        }

        if let Err(e) = self.dispatcher.update_or_install(cluster_id, "", false).await {
            error!(%cluster_id, error = %e, "Queued update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sqlite_directory, seed_cluster};
    use std::time::Duration;
    use vzmgr_protocol::MemoryTransport;

    async fn bus_updater(
        latest: Option<&str>,
    ) -> (BusUpdater, Arc<MemoryTransport>, Arc<dyn DirectoryStore>) {
        let directory = sqlite_directory().await;
        let bus = Arc::new(MemoryTransport::default());
        let updater = BusUpdater::new(
            directory.clone(),
            bus.clone(),
            latest.map(str::to_string),
        );
        (updater, bus, directory)
    }

    #[test]
    fn test_is_up_to_date() {
        assert!(is_up_to_date("0.14.2", "0.14.2"));
        assert!(is_up_to_date("0.15.0", "0.14.2"));
        assert!(is_up_to_date("v0.14.2", "0.14.2"));
        assert!(!is_up_to_date("0.14.1", "0.14.2"));
        assert!(!is_up_to_date("", "0.14.2"));
        assert!(is_up_to_date("dev", "dev"));
    }

    #[tokio::test]
    async fn test_version_up_to_date_without_target() {
        let (updater, _bus, directory) = bus_updater(None).await;
        let cluster = seed_cluster(directory.as_ref(), Uuid::new_v4(), "k8s-1", "a").await;
        assert!(updater.version_up_to_date(cluster).await);
    }

    #[tokio::test]
    async fn test_version_up_to_date_compares_stored_version() {
        let (updater, _bus, directory) = bus_updater(Some("0.14.2")).await;
        let cluster = seed_cluster(directory.as_ref(), Uuid::new_v4(), "k8s-1", "a").await;

        // Freshly provisioned clusters report no version yet.
        assert!(!updater.version_up_to_date(cluster).await);
        assert!(updater.version_up_to_date(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_update_or_install_publishes_request() {
        let (updater, bus, directory) = bus_updater(Some("0.14.2")).await;
        let cluster = seed_cluster(directory.as_ref(), Uuid::new_v4(), "k8s-1", "a").await;

        let mut sub = bus.subscribe(&format!("c2v.{cluster}.update")).await.unwrap();
        let ack = updater.update_or_install(cluster, "", true).await.unwrap();
        assert!(ack.update_started);
        assert_eq!(ack.version, "0.14.2");

        let msg = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        let envelope = Envelope::from_bytes(&msg.payload).unwrap();
        assert_eq!(envelope.kind, MessageKind::Update);
        let request: UpdateOrInstallRequest = envelope.decode().unwrap();
        assert_eq!(request.vizier_id, cluster);
        assert_eq!(request.version, "0.14.2");
        assert!(request.redeploy_etcd);
    }

    #[tokio::test]
    async fn test_update_or_install_errors() {
        let (updater, _bus, directory) = bus_updater(None).await;
        let cluster = seed_cluster(directory.as_ref(), Uuid::new_v4(), "k8s-1", "a").await;

        let err = updater.update_or_install(cluster, "", false).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");

        let err = updater
            .update_or_install(Uuid::new_v4(), "0.14.2", false)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_queue_deduplicates_and_drops_on_overflow() {
        let (dispatcher, _bus, _directory) = bus_updater(Some("0.14.2")).await;
        let (updater, _worker) = QueuedUpdater::new(dispatcher, 1);

        let first = Uuid::new_v4();
        updater.add_to_update_queue(first);
        updater.add_to_update_queue(first);
        assert_eq!(updater.pending_len(), 1);

        // Queue is full; the second cluster is dropped, not blocked on.
        updater.add_to_update_queue(Uuid::new_v4());
        assert_eq!(updater.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_worker_sends_queued_update() {
        let (dispatcher, bus, directory) = bus_updater(Some("0.14.2")).await;
        let cluster = seed_cluster(directory.as_ref(), Uuid::new_v4(), "k8s-1", "a").await;
        let (updater, worker) = QueuedUpdater::new(dispatcher, 8);

        let mut sub = bus.subscribe("c2v.*.update").await.unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        updater.add_to_update_queue(cluster);
        let msg = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.topic, format!("c2v.{cluster}.update"));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updater.pending_len(), 0);
    }
}

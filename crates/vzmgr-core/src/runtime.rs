// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for vzmgr-core.
//!
//! [`ControllerRuntime`] wires the directory, collaborators and transport
//! together and runs the message bridge plus the update worker as tokio tasks.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vzmgr_core::runtime::ControllerRuntime;
//!
//! let runtime = ControllerRuntime::builder()
//!     .directory(directory)
//!     .encryptor(Arc::new(encryptor))
//!     .resolver(Arc::new(resolver))
//!     .transport(Arc::new(transport))
//!     .latest_version(Some("0.14.0".to_string()))
//!     .build()?
//!     .start()
//!     .await?;
//!
//! runtime.run_until(tokio::signal::ctrl_c()).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use vzmgr_protocol::Transport;

use crate::bridge::{Bridge, BridgeError};
use crate::controller::ControllerState;
use crate::crypto::EncryptionProvider;
use crate::directory::DirectoryStore;
use crate::resolver::AddressResolver;
use crate::shard::ShardRange;
use crate::updater::{BusUpdater, QueuedUpdater};

/// Default capacity of the update queue.
pub const DEFAULT_UPDATE_QUEUE_SIZE: usize = 256;

/// Builder for creating a [`ControllerRuntime`].
pub struct ControllerRuntimeBuilder {
    directory: Option<Arc<dyn DirectoryStore>>,
    encryptor: Option<Arc<dyn EncryptionProvider>>,
    resolver: Option<Arc<dyn AddressResolver>>,
    transport: Option<Arc<dyn Transport>>,
    shard_range: ShardRange,
    latest_version: Option<String>,
    update_queue_size: usize,
}

impl std::fmt::Debug for ControllerRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRuntimeBuilder")
            .field("directory", &self.directory.as_ref().map(|_| "..."))
            .field("transport", &self.transport.as_ref().map(|_| "..."))
            .field("shard_range", &self.shard_range)
            .field("latest_version", &self.latest_version)
            .field("update_queue_size", &self.update_queue_size)
            .finish_non_exhaustive()
    }
}

impl Default for ControllerRuntimeBuilder {
    fn default() -> Self {
        Self {
            directory: None,
            encryptor: None,
            resolver: None,
            transport: None,
            shard_range: ShardRange::FULL,
            latest_version: None,
            update_queue_size: DEFAULT_UPDATE_QUEUE_SIZE,
        }
    }
}

impl ControllerRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory store (required).
    pub fn directory(mut self, directory: Arc<dyn DirectoryStore>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Set the signing key encryptor (required).
    pub fn encryptor(mut self, encryptor: Arc<dyn EncryptionProvider>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Set the address resolver (required).
    pub fn resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the pub/sub transport (required).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shards handled by this replica.
    ///
    /// Default: every shard (`00-ff`)
    pub fn shard_range(mut self, shard_range: ShardRange) -> Self {
        self.shard_range = shard_range;
        self
    }

    /// Version clusters are updated to; `None` disables auto-update.
    pub fn latest_version(mut self, latest_version: Option<String>) -> Self {
        self.latest_version = latest_version;
        self
    }

    /// Default: [`DEFAULT_UPDATE_QUEUE_SIZE`]
    pub fn update_queue_size(mut self, size: usize) -> Self {
        self.update_queue_size = size;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if a required collaborator is missing.
    pub fn build(self) -> Result<ControllerRuntimeConfig> {
        let directory = self
            .directory
            .ok_or_else(|| anyhow::anyhow!("directory is required"))?;
        let encryptor = self
            .encryptor
            .ok_or_else(|| anyhow::anyhow!("encryptor is required"))?;
        let resolver = self
            .resolver
            .ok_or_else(|| anyhow::anyhow!("resolver is required"))?;
        let transport = self
            .transport
            .ok_or_else(|| anyhow::anyhow!("transport is required"))?;
        if self.update_queue_size == 0 {
            anyhow::bail!("update_queue_size must be greater than zero");
        }

        Ok(ControllerRuntimeConfig {
            directory,
            encryptor,
            resolver,
            transport,
            shard_range: self.shard_range,
            latest_version: self.latest_version,
            update_queue_size: self.update_queue_size,
        })
    }
}

/// Configuration for a [`ControllerRuntime`].
pub struct ControllerRuntimeConfig {
    directory: Arc<dyn DirectoryStore>,
    encryptor: Arc<dyn EncryptionProvider>,
    resolver: Arc<dyn AddressResolver>,
    transport: Arc<dyn Transport>,
    shard_range: ShardRange,
    latest_version: Option<String>,
    update_queue_size: usize,
}

impl std::fmt::Debug for ControllerRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRuntimeConfig")
            .field("directory", &"...")
            .field("shard_range", &self.shard_range)
            .field("latest_version", &self.latest_version)
            .field("update_queue_size", &self.update_queue_size)
            .finish_non_exhaustive()
    }
}

impl ControllerRuntimeConfig {
    /// Start the runtime, spawning the bridge and the update worker.
    pub async fn start(self) -> Result<ControllerRuntime> {
        let dispatcher = BusUpdater::new(
            self.directory.clone(),
            self.transport.clone(),
            self.latest_version,
        );
        let (updater, worker) = QueuedUpdater::new(dispatcher, self.update_queue_size);

        let state = Arc::new(
            ControllerState::new(
                self.directory,
                self.encryptor,
                self.resolver,
                Arc::new(updater),
            )
            .with_bus(self.transport.clone()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));
        let bridge = Bridge::new(self.transport, state.clone(), self.shard_range);
        let bridge_handle = tokio::spawn(bridge.run(shutdown_rx));

        info!(shard_range = %self.shard_range, "ControllerRuntime started");

        Ok(ControllerRuntime {
            bridge_handle,
            worker_handle,
            shutdown_tx,
            state,
            shard_range: self.shard_range,
        })
    }
}

/// A running controller that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination, or
/// [`run_until`](Self::run_until) to block until a signal or a bridge failure.
pub struct ControllerRuntime {
    bridge_handle: JoinHandle<std::result::Result<(), BridgeError>>,
    worker_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<ControllerState>,
    shard_range: ShardRange,
}

impl std::fmt::Debug for ControllerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRuntime")
            .field("shard_range", &self.shard_range)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ControllerRuntime {
    pub fn builder() -> ControllerRuntimeBuilder {
        ControllerRuntimeBuilder::new()
    }

    /// Shared controller state, for serving management requests.
    pub fn state(&self) -> &Arc<ControllerState> {
        &self.state
    }

    pub fn shard_range(&self) -> ShardRange {
        self.shard_range
    }

    /// Check if the bridge is still running.
    pub fn is_running(&self) -> bool {
        !self.bridge_handle.is_finished()
    }

    /// Gracefully shut down the bridge and the update worker.
    pub async fn shutdown(self) -> Result<()> {
        info!("ControllerRuntime shutting down...");
        let _ = self.shutdown_tx.send(true);

        let bridge_result = self.bridge_handle.await;
        if let Err(e) = self.worker_handle.await {
            warn!("Update worker task panicked: {}", e);
        }

        match bridge_result {
            Ok(Ok(())) => {
                info!("ControllerRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Bridge error during shutdown: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("Bridge task panicked: {}", e);
                Err(anyhow::anyhow!("bridge task panicked: {}", e))
            }
        }
    }

    /// Run until `signal` completes or the bridge stops on its own.
    ///
    /// A bridge that stops on its own (transport loss) is returned as an
    /// error so the caller can exit non-zero.
    pub async fn run_until<F>(mut self, signal: F) -> Result<()>
    where
        F: Future,
    {
        tokio::select! {
            _ = signal => {
                info!("Shutdown signal received");
                self.shutdown().await
            }
            joined = &mut self.bridge_handle => {
                let _ = self.shutdown_tx.send(true);
                if let Err(e) = self.worker_handle.await {
                    warn!("Update worker task panicked: {}", e);
                }
                match joined {
                    Ok(Ok(())) => Err(anyhow::anyhow!("message bridge stopped unexpectedly")),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(anyhow::anyhow!("bridge task panicked: {}", e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use vzmgr_protocol::MemoryTransport;

    use crate::resolver::DomainAddressResolver;
    use crate::test_support::{sqlite_directory, test_encryptor};

    async fn builder(transport: Arc<MemoryTransport>) -> ControllerRuntimeBuilder {
        ControllerRuntime::builder()
            .directory(sqlite_directory().await)
            .encryptor(Arc::new(test_encryptor()))
            .resolver(Arc::new(DomainAddressResolver::new("dev.withpixie.dev")))
            .transport(transport)
    }

    async fn wait_for_subscriber(transport: &MemoryTransport) {
        for _ in 0..100 {
            if transport.subscriber_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("bridge never subscribed");
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = ControllerRuntime::builder().build().unwrap_err();
        assert!(err.to_string().contains("directory"));
    }

    #[tokio::test]
    async fn test_builder_rejects_empty_queue() {
        let transport = Arc::new(MemoryTransport::default());
        let result = builder(transport).await.update_queue_size(0).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let transport = Arc::new(MemoryTransport::default());
        let runtime = builder(transport.clone())
            .await
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        wait_for_subscriber(&transport).await;
        assert!(runtime.is_running());
        assert_eq!(runtime.shard_range(), ShardRange::FULL);

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_reports_transport_loss() {
        let transport = Arc::new(MemoryTransport::default());
        let runtime = builder(transport.clone())
            .await
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        wait_for_subscriber(&transport).await;
        transport.close();

        let err = runtime
            .run_until(std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transport closed"));
    }
}

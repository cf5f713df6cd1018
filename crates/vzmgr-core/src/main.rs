// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! vzmgr - Fleet Connectivity Controller
//!
//! Relays cluster messages from the Redis bus to the connectivity controller
//! until Ctrl-C. Losing the bus ends the process with a non-zero exit code.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use vzmgr_core::config::Config;
use vzmgr_core::crypto::AesGcmEncryptor;
use vzmgr_core::directory;
use vzmgr_core::resolver::DomainAddressResolver;
use vzmgr_core::runtime::ControllerRuntime;
use vzmgr_protocol::RedisTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vzmgr_core=info".parse()?),
        )
        .init();

    info!("Starting vzmgr");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        shard_range = %config.shard_range,
        domain = %config.domain_name,
        latest_vizier_version = ?config.latest_vizier_version,
        "Configuration loaded"
    );

    info!("Connecting to directory...");
    let directory = directory::connect(&config.database_url).await?;
    info!("Directory ready, migrations applied");

    let encryptor = AesGcmEncryptor::from_key(&config.database_key)?;

    let mut resolver = DomainAddressResolver::new(config.domain_name.clone());
    if let (Some(cert), Some(key)) = (&config.cluster_tls_cert, &config.cluster_tls_key) {
        resolver = resolver.load_certs(cert, key).await?;
        info!(cert = %cert.display(), "Cluster TLS material loaded");
    }

    info!(url = %config.redis_url, "Connecting to bus...");
    let transport = RedisTransport::connect(&config.redis_url).await?;

    let runtime = ControllerRuntime::builder()
        .directory(directory)
        .encryptor(Arc::new(encryptor))
        .resolver(Arc::new(resolver))
        .transport(Arc::new(transport))
        .shard_range(config.shard_range)
        .latest_version(config.latest_vizier_version.clone())
        .update_queue_size(config.update_queue_size)
        .build()?
        .start()
        .await?;

    info!("vzmgr initialized successfully");

    if let Err(e) = runtime.run_until(tokio::signal::ctrl_c()).await {
        error!("vzmgr stopped: {:#}", e);
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

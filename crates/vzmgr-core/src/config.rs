// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::fmt;
use std::path::PathBuf;

use crate::shard::ShardRange;

/// vzmgr configuration
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Key for encrypting cluster signing keys at rest (64 hex chars or base64)
    pub database_key: String,
    /// Redis URL of the pub/sub bus
    pub redis_url: String,
    /// Domain under which cluster DNS names are derived
    pub domain_name: String,
    /// Shards owned by this replica
    pub shard_range: ShardRange,
    /// Version auto-update targets; `None` disables auto-update enqueueing
    pub latest_vizier_version: Option<String>,
    /// Capacity of the update queue
    pub update_queue_size: usize,
    /// PEM certificate served to clusters on SSL requests
    pub cluster_tls_cert: Option<PathBuf>,
    /// PEM private key served to clusters on SSL requests
    pub cluster_tls_key: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `VZMGR_DATABASE_URL`: PostgreSQL or SQLite connection string
    /// - `VZMGR_DATABASE_KEY`: 32-byte signing-key encryption key (hex or base64)
    ///
    /// Optional (with defaults):
    /// - `VZMGR_REDIS_URL`: pub/sub bus (default: redis://127.0.0.1:6379)
    /// - `VZMGR_DOMAIN_NAME`: cluster DNS domain (default: dev.withpixie.dev)
    /// - `VZMGR_SHARD_RANGE`: owned shards as `from-to` (default: 00-ff)
    /// - `VZMGR_LATEST_VIZIER_VERSION`: auto-update target (default: unset)
    /// - `VZMGR_UPDATE_QUEUE_SIZE`: update queue capacity (default: 256)
    /// - `VZMGR_CLUSTER_TLS_CERT` / `VZMGR_CLUSTER_TLS_KEY`: PEM files for SSL requests
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("VZMGR_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("VZMGR_DATABASE_URL"))?;

        let database_key = std::env::var("VZMGR_DATABASE_KEY")
            .map_err(|_| ConfigError::Missing("VZMGR_DATABASE_KEY"))?;

        let redis_url = std::env::var("VZMGR_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let domain_name = std::env::var("VZMGR_DOMAIN_NAME")
            .unwrap_or_else(|_| "dev.withpixie.dev".to_string());

        let shard_range: ShardRange = std::env::var("VZMGR_SHARD_RANGE")
            .unwrap_or_else(|_| "00-ff".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "VZMGR_SHARD_RANGE",
                    "must be two hex bytes as <from>-<to> with from <= to",
                )
            })?;

        let latest_vizier_version = match std::env::var("VZMGR_LATEST_VIZIER_VERSION") {
            Ok(version) if !version.trim().is_empty() => {
                let version = version.trim().to_string();
                semver::Version::parse(&version).map_err(|_| {
                    ConfigError::Invalid("VZMGR_LATEST_VIZIER_VERSION", "must be a semver version")
                })?;
                Some(version)
            }
            _ => None,
        };

        let update_queue_size = std::env::var("VZMGR_UPDATE_QUEUE_SIZE")
            .unwrap_or_else(|_| "256".to_string())
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or(ConfigError::Invalid(
                "VZMGR_UPDATE_QUEUE_SIZE",
                "must be a positive integer",
            ))?;

        let cluster_tls_cert = std::env::var("VZMGR_CLUSTER_TLS_CERT").ok().map(PathBuf::from);
        let cluster_tls_key = std::env::var("VZMGR_CLUSTER_TLS_KEY").ok().map(PathBuf::from);
        if cluster_tls_cert.is_some() != cluster_tls_key.is_some() {
            return Err(ConfigError::Invalid(
                "VZMGR_CLUSTER_TLS_CERT",
                "VZMGR_CLUSTER_TLS_CERT and VZMGR_CLUSTER_TLS_KEY must be set together",
            ));
        }

        Ok(Self {
            database_url,
            database_key,
            redis_url,
            domain_name,
            shard_range,
            latest_vizier_version,
            update_queue_size,
            cluster_tls_cert,
            cluster_tls_key,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("database_key", &"<redacted>")
            .field("redis_url", &self.redis_url)
            .field("domain_name", &self.domain_name)
            .field("shard_range", &self.shard_range)
            .field("latest_vizier_version", &self.latest_vizier_version)
            .field("update_queue_size", &self.update_queue_size)
            .field("cluster_tls_cert", &self.cluster_tls_cert)
            .field("cluster_tls_key", &self.cluster_tls_key)
            .finish()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const OPTIONAL_VARS: [&str; 7] = [
        "VZMGR_REDIS_URL",
        "VZMGR_DOMAIN_NAME",
        "VZMGR_SHARD_RANGE",
        "VZMGR_LATEST_VIZIER_VERSION",
        "VZMGR_UPDATE_QUEUE_SIZE",
        "VZMGR_CLUSTER_TLS_CERT",
        "VZMGR_CLUSTER_TLS_KEY",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        /// Required vars set, every optional var cleared.
        fn minimal() -> Self {
            let mut guard = Self::new();
            guard.set("VZMGR_DATABASE_URL", "postgres://localhost/test");
            guard.set("VZMGR_DATABASE_KEY", &"ab".repeat(32));
            for key in OPTIONAL_VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::minimal();

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.domain_name, "dev.withpixie.dev");
        assert_eq!(config.shard_range, ShardRange::FULL);
        assert_eq!(config.latest_vizier_version, None);
        assert_eq!(config.update_queue_size, 256);
        assert!(config.cluster_tls_cert.is_none());
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::minimal();

        guard.set("VZMGR_DATABASE_URL", "sqlite:vzmgr.db");
        guard.set("VZMGR_REDIS_URL", "redis://bus:6379");
        guard.set("VZMGR_DOMAIN_NAME", "example.com");
        guard.set("VZMGR_SHARD_RANGE", "00-7F");
        guard.set("VZMGR_LATEST_VIZIER_VERSION", "0.14.2");
        guard.set("VZMGR_UPDATE_QUEUE_SIZE", "16");
        guard.set("VZMGR_CLUSTER_TLS_CERT", "/etc/vzmgr/tls.crt");
        guard.set("VZMGR_CLUSTER_TLS_KEY", "/etc/vzmgr/tls.key");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite:vzmgr.db");
        assert_eq!(config.redis_url, "redis://bus:6379");
        assert_eq!(config.domain_name, "example.com");
        assert_eq!(config.shard_range.to_string(), "00-7f");
        assert_eq!(config.latest_vizier_version.as_deref(), Some("0.14.2"));
        assert_eq!(config.update_queue_size, 16);
        assert_eq!(
            config.cluster_tls_key,
            Some(PathBuf::from("/etc/vzmgr/tls.key"))
        );
    }

    #[test]
    fn test_config_missing_required() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::minimal();

        guard.remove("VZMGR_DATABASE_URL");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VZMGR_DATABASE_URL")));
        assert!(err.to_string().contains("VZMGR_DATABASE_URL"));

        guard.set("VZMGR_DATABASE_URL", "postgres://localhost/test");
        guard.remove("VZMGR_DATABASE_KEY");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VZMGR_DATABASE_KEY")));
    }

    #[test]
    fn test_config_invalid_shard_range() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::minimal();

        for bad in ["ff-00", "0-ff", "zz-ff", "00ff"] {
            guard.set("VZMGR_SHARD_RANGE", bad);
            let err = Config::from_env().unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid("VZMGR_SHARD_RANGE", _)),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_invalid_queue_size() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::minimal();

        for bad in ["0", "-5", "abc"] {
            guard.set("VZMGR_UPDATE_QUEUE_SIZE", bad);
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid("VZMGR_UPDATE_QUEUE_SIZE", _)));
        }
    }

    #[test]
    fn test_config_invalid_latest_version() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::minimal();

        guard.set("VZMGR_LATEST_VIZIER_VERSION", "latest");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("VZMGR_LATEST_VIZIER_VERSION", _)
        ));

        guard.set("VZMGR_LATEST_VIZIER_VERSION", "  ");
        assert_eq!(Config::from_env().unwrap().latest_vizier_version, None);
    }

    #[test]
    fn test_config_tls_paths_must_pair() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::minimal();

        guard.set("VZMGR_CLUSTER_TLS_CERT", "/etc/vzmgr/tls.crt");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("VZMGR_CLUSTER_TLS_CERT", _)));
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::minimal();

        let config = Config::from_env().unwrap();
        let debug_str = format!("{:?}", config);

        assert!(debug_str.contains("Config"));
        assert!(debug_str.contains("database_url"));
        assert!(debug_str.contains("<redacted>"));
        assert!(!debug_str.contains(&"ab".repeat(32)));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}

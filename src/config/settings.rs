//! # Configuration Settings
//!
//! Defines the configuration structure for the Keyplane data plane.
//!
//! Configuration is loaded from `KEYPLANE_*` environment variables via
//! [`AppConfig::from_env`] and checked with [`AppConfig::validate`] before
//! the data plane starts. Every knob has a default that produces a working
//! single-node, file-backed deployment.

use crate::domain::BackingStoreKind;
use crate::errors::{KeyplaneError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Secret store configuration
    #[validate(nested)]
    pub store: StoreConfig,

    /// Encryption codec configuration
    #[validate(nested)]
    pub crypto: CryptoConfig,

    /// Persistence queue configuration
    #[validate(nested)]
    pub queue: QueueConfig,

    /// Cluster-object mirroring configuration
    #[validate(nested)]
    pub cluster: ClusterConfig,
}

impl AppConfig {
    /// Load configuration from `KEYPLANE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            store: StoreConfig {
                data_dir: env_or("KEYPLANE_DATA_DIR", "/var/lib/keyplane/data"),
                backing_store: parse_env("KEYPLANE_BACKING_STORE", BackingStoreKind::File)?,
                backup_count: parse_env("KEYPLANE_BACKUP_COUNT", 3u32)?,
                op_timeout_ms: parse_env("KEYPLANE_OP_TIMEOUT_MS", 10_000u64)?,
                ready_poll_ms: parse_env("KEYPLANE_READY_POLL_MS", 5_000u64)?,
            },
            crypto: CryptoConfig {
                fips_compliant: parse_env("KEYPLANE_FIPS_COMPLIANT", false)?,
                iv_wait_ms: parse_env("KEYPLANE_IV_WAIT_MS", 50u64)?,
            },
            queue: QueueConfig {
                upsert_capacity: parse_env("KEYPLANE_UPSERT_QUEUE_CAP", 32usize)?,
                delete_capacity: parse_env("KEYPLANE_DELETE_QUEUE_CAP", 32usize)?,
                cluster_capacity: parse_env("KEYPLANE_CLUSTER_QUEUE_CAP", 32usize)?,
            },
            cluster: ClusterConfig {
                mirror_prefix: env_or("KEYPLANE_MIRROR_PREFIX", "cluster:"),
                raw_prefix: env_or("KEYPLANE_RAW_PREFIX", "raw:"),
                delete_enabled: parse_env("KEYPLANE_MIRROR_DELETE_ENABLED", false)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(KeyplaneError::from)?;
        self.validate_custom()
    }

    /// Custom validation logic that goes beyond what the validator crate can do
    fn validate_custom(&self) -> Result<()> {
        if self.store.backing_store == BackingStoreKind::File
            && self.store.data_dir.as_os_str().is_empty()
        {
            return Err(KeyplaneError::config(
                "Data directory must be set when the file backing store is selected",
            ));
        }

        if self.cluster.mirror_prefix.is_empty() {
            return Err(KeyplaneError::config("Cluster mirror prefix cannot be empty"));
        }

        Ok(())
    }
}

/// Secret store and backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoreConfig {
    /// Directory holding encrypted secret files and their rotating backups
    pub data_dir: PathBuf,

    /// Durable destination for secret records
    pub backing_store: BackingStoreKind,

    /// Number of rotating backup copies kept per secret
    #[validate(range(min = 1, max = 64, message = "Backup count must be between 1 and 64"))]
    pub backup_count: u32,

    /// Deadline for a single adapter call reaching an external system
    #[validate(range(min = 100, message = "Operation timeout must be at least 100ms"))]
    pub op_timeout_ms: u64,

    /// Sleep interval while polling a not-yet-ready backing store
    #[validate(range(min = 10, message = "Readiness poll interval must be at least 10ms"))]
    pub ready_poll_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/keyplane/data"),
            backing_store: BackingStoreKind::File,
            backup_count: 3,
            op_timeout_ms: 10_000,
            ready_poll_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Adapter call deadline as a Duration
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Readiness poll interval as a Duration
    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }
}

/// Encryption codec configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CryptoConfig {
    /// Select the symmetric (FIPS-style) algorithm instead of the
    /// asymmetric one
    pub fips_compliant: bool,

    /// Minimum interval between symmetric encryptions. Generating IVs
    /// faster than this degrades their randomness, so faster calls are
    /// rejected instead.
    #[validate(range(min = 1, max = 10_000, message = "IV wait must be between 1ms and 10s"))]
    pub iv_wait_ms: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self { fips_compliant: false, iv_wait_ms: 50 }
    }
}

impl CryptoConfig {
    /// Minimum symmetric-encryption interval as a Duration
    pub fn iv_wait(&self) -> Duration {
        Duration::from_millis(self.iv_wait_ms)
    }
}

/// Persistence queue capacities
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueueConfig {
    /// Capacity of the backing-store upsert queue
    #[validate(range(min = 1, message = "Queue capacity must be at least 1"))]
    pub upsert_capacity: usize,

    /// Capacity of the backing-store delete queue
    #[validate(range(min = 1, message = "Queue capacity must be at least 1"))]
    pub delete_capacity: usize,

    /// Capacity of each cluster-object mirror queue
    #[validate(range(min = 1, message = "Queue capacity must be at least 1"))]
    pub cluster_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { upsert_capacity: 32, delete_capacity: 32, cluster_capacity: 32 }
    }
}

/// Cluster-object mirroring configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClusterConfig {
    /// Secrets whose name carries this prefix are mirrored into cluster
    /// objects
    pub mirror_prefix: String,

    /// Secrets whose name carries this prefix are never mirrored
    pub raw_prefix: String,

    /// Whether deleting a secret also deletes its mirrored cluster objects.
    /// Deleting cluster objects is destructive, so this is opt-in.
    pub delete_enabled: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mirror_prefix: "cluster:".to_string(),
            raw_prefix: "raw:".to_string(),
            delete_enabled: false,
        }
    }
}

fn env_or<T: From<String>>(key: &str, default: &str) -> T {
    T::from(std::env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| KeyplaneError::config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

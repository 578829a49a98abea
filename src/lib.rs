//! # Keyplane
//!
//! Keyplane is a secrets-management data plane: it accepts secret values
//! from a trusted control-plane caller, keeps an authoritative in-memory
//! copy, encrypts them at rest, and durably replicates them to a pluggable
//! backing store, while serving low-latency reads to authorized consumers.
//!
//! ## Architecture
//!
//! ```text
//! Control Plane Caller → Secret Store → Persistence Queues → Queue Workers
//!                            ↓                                    ↓
//!                      Status Tracker                   Backing Store Adapters
//!                                                     (file / cluster / relational)
//!                                 Encryption Codec ← Root Key Manager
//! ```
//!
//! ## Core Components
//!
//! - **Secret Store**: concurrent in-memory index with append-aware upsert,
//!   read-through hydration, and lazy repopulation from disk
//! - **Encryption Codec**: dual-algorithm encryption (X25519 or AES-256-GCM
//!   by compliance mode) derived from a set-once root key
//! - **Persistence Pipeline**: bounded queues drained by one worker each,
//!   with backpressure, retry-with-backoff, and readiness parking
//! - **Backing Store Adapters**: file (with rotating backups), cluster
//!   object, and relational stores behind one trait and registry
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use keyplane::{AppConfig, DataPlane, SecretRecord};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> keyplane::Result<()> {
//!     let config = Arc::new(AppConfig::from_env()?);
//!     let plane = DataPlane::start(config, None)?;
//!
//!     plane.root_key().set(&keyplane::crypto::generate_root_key()?.combine());
//!     plane.store().upsert(SecretRecord::new("db-pass", vec!["s3cr3t".into()]), false).await?;
//!     plane.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod persistence;
pub mod store;

// Re-export commonly used types
pub use adapters::{ClusterObjectClient, DbPool};
pub use config::AppConfig;
pub use crypto::{EncryptionCodec, RootKeyManager};
pub use domain::{SecretMeta, SecretRecord};
pub use errors::{KeyplaneError, Result};
pub use store::SecretStore;

use adapters::{
    AdapterRegistry, BackingStoreAdapter, ClusterObjectAdapter, FileStoreAdapter,
    RelationalStoreAdapter,
};
use domain::BackingStoreKind;
use persistence::{build_channels, spawn_workers, WorkerHandle};
use std::sync::Arc;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// The assembled data plane: the secret store, its crypto, and the
/// persistence workers, wired together from one configuration.
pub struct DataPlane {
    store: Arc<SecretStore>,
    root_key: Arc<RootKeyManager>,
    codec: Arc<EncryptionCodec>,
    relational: Arc<RelationalStoreAdapter>,
    workers: WorkerHandle,
}

impl DataPlane {
    /// Construct every component and spawn the persistence workers.
    ///
    /// The root key starts unset; call [`RootKeyManager::set`] before the
    /// store will accept secrets. A cluster object client enables
    /// mirroring; the relational pool is attached later via
    /// [`DataPlane::attach_relational`] once the database is reachable.
    pub fn start(
        config: Arc<AppConfig>,
        cluster_client: Option<Arc<dyn ClusterObjectClient>>,
    ) -> Result<Self> {
        config.validate()?;

        if config.store.backing_store == BackingStoreKind::File {
            std::fs::create_dir_all(&config.store.data_dir).map_err(|e| {
                KeyplaneError::io(
                    e,
                    format!("failed to create data dir {}", config.store.data_dir.display()),
                )
            })?;
        }

        let root_key = Arc::new(RootKeyManager::new());
        let codec = Arc::new(EncryptionCodec::new(Arc::clone(&root_key), &config.crypto));
        let file_adapter = Arc::new(FileStoreAdapter::new(
            &config.store.data_dir,
            config.store.backup_count,
            Arc::clone(&codec),
        ));
        let relational = Arc::new(RelationalStoreAdapter::new(Arc::clone(&codec)));

        let mut registry = AdapterRegistry::new();
        registry.register(Arc::clone(&file_adapter) as Arc<dyn BackingStoreAdapter>);
        registry.register(Arc::clone(&relational) as Arc<dyn BackingStoreAdapter>);

        let cluster_adapter = cluster_client.map(|client| {
            Arc::new(ClusterObjectAdapter::new(
                client,
                config.cluster.mirror_prefix.clone(),
                config.cluster.raw_prefix.clone(),
                config.cluster.delete_enabled,
            ))
        });
        if let Some(adapter) = &cluster_adapter {
            registry.register(Arc::clone(adapter) as Arc<dyn BackingStoreAdapter>);
        }

        let (queues, receivers) = build_channels(&config.queue);
        let store = Arc::new(SecretStore::new(
            Arc::clone(&config),
            Arc::clone(&root_key),
            Arc::clone(&codec),
            file_adapter,
            Some(Arc::clone(&relational)),
            queues,
        ));

        let workers = spawn_workers(config, Arc::new(registry), cluster_adapter, receivers);

        Ok(Self { store, root_key, codec, relational, workers })
    }

    /// The secret store serving all read and write operations
    pub fn store(&self) -> &Arc<SecretStore> {
        &self.store
    }

    /// The root key manager; set the key material exactly once at startup
    pub fn root_key(&self) -> &RootKeyManager {
        &self.root_key
    }

    /// The encryption codec, for single-value encrypt/decrypt round-trips
    pub fn codec(&self) -> &EncryptionCodec {
        &self.codec
    }

    /// Attach the relational pool once the database has warmed up
    pub async fn attach_relational(&self, pool: DbPool) -> Result<()> {
        self.relational.attach(pool).await
    }

    /// Drain the persistence queues and stop the workers
    pub async fn shutdown(self) {
        self.workers.shutdown();
        self.workers.join().await;
    }
}

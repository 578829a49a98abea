//! The secret store
//!
//! The concurrent in-memory index of secret records and the business logic
//! around it: upsert with append semantics, delete, read-through hydration
//! from disk, listing, and the lazy populate-once protocol. All index
//! mutation happens synchronously here before any asynchronous persistence
//! work is queued; workers operate on records by value and never touch the
//! index.

use crate::adapters::{BackingStoreAdapter, FileStoreAdapter, RelationalStoreAdapter};
use crate::config::AppConfig;
use crate::crypto::{EncryptionCodec, RootKeyManager};
use crate::domain::{
    BackingStoreKind, EncryptedSecretRecord, SecretRecord, SecretView, KEYSTONE_SECRET_NAME,
};
use crate::errors::{KeyplaneError, Result};
use crate::persistence::StoreQueues;
use crate::store::{Status, StatusTracker};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

/// The concurrent in-memory secret store.
///
/// Constructed once at startup and shared by reference with every
/// collaborator; there is no process-global state, so tests can run any
/// number of isolated instances.
pub struct SecretStore {
    config: Arc<AppConfig>,
    index: DashMap<String, SecretRecord>,
    root_key: Arc<RootKeyManager>,
    codec: Arc<EncryptionCodec>,
    status: StatusTracker,
    file_adapter: Arc<FileStoreAdapter>,
    relational: Option<Arc<RelationalStoreAdapter>>,
    queues: StoreQueues,
    /// Flips to true only after a successful repopulation from the
    /// backing store, so populate runs at most once per process lifetime.
    populated: Mutex<bool>,
}

impl SecretStore {
    pub fn new(
        config: Arc<AppConfig>,
        root_key: Arc<RootKeyManager>,
        codec: Arc<EncryptionCodec>,
        file_adapter: Arc<FileStoreAdapter>,
        relational: Option<Arc<RelationalStoreAdapter>>,
        queues: StoreQueues,
    ) -> Self {
        let status = StatusTracker::new();
        status.register_queue(queues.upsert.depth());
        status.register_queue(queues.delete.depth());
        status.register_queue(queues.cluster_upsert.depth());
        status.register_queue(queues.cluster_delete.depth());

        Self {
            config,
            index: DashMap::new(),
            root_key,
            codec,
            status,
            file_adapter,
            relational,
            queues,
            populated: Mutex::new(false),
        }
    }

    /// Insert a secret into the store, or update it if it already exists.
    ///
    /// Empty values are filtered out first; a record with nothing left is a
    /// logged no-op, not a deletion. With `append`, existing values not
    /// present in the new value set survive behind the new ones. The index
    /// mutation is synchronous; durable persistence is queued and happens
    /// asynchronously.
    pub async fn upsert(&self, mut record: SecretRecord, append: bool) -> Result<()> {
        // A store that cannot encrypt must not accept the secret at all,
        // not even into memory.
        if !self.root_key.is_set() {
            return Err(KeyplaneError::config("root key not set; cannot store secrets"));
        }

        record.values.retain(|value| !value.is_empty());
        if record.values.is_empty() {
            info!(secret = %record.name, correlation_id = %record.meta.correlation_id,
                "nothing to upsert");
            return Ok(());
        }

        let now = Utc::now();
        if let Some(existing) = self.index.get(&record.name) {
            trace!(secret = %record.name, "secret exists; updating");
            record.created = existing.created;

            if append {
                for value in &existing.values {
                    if !value.is_empty() && !record.values.contains(value) {
                        record.values.push(value.clone());
                    }
                }
            }
        } else {
            record.created = now;
        }
        record.updated = now;

        match record.render_transformed() {
            Ok(transformed) => record.value_transformed = transformed,
            Err(e) => {
                info!(secret = %record.name, error = %e,
                    "transform failed; storing fallback value");
                record.value_transformed =
                    record.values.first().cloned().unwrap_or_default();
            }
        }

        info!(secret = %record.name, correlation_id = %record.meta.correlation_id,
            values = record.values.len(), "upserting secret");

        self.status.increment(&record.name, |name| self.index.contains_key(name));
        self.index.insert(record.name.clone(), record.clone());

        let mirror = record
            .mirror_eligible(&self.config.cluster.mirror_prefix, &self.config.cluster.raw_prefix);

        trace!(secret = %record.name, queue_len = self.queues.upsert.depth().len(),
            "queueing secret for persistence");
        self.queues.upsert.send(record.clone()).await?;

        if mirror {
            trace!(secret = %record.name, "queueing secret for cluster mirroring");
            self.queues.cluster_upsert.send(record).await?;
        }

        Ok(())
    }

    /// Remove a secret from the store.
    ///
    /// An unknown name is a logged no-op and enqueues nothing. The index
    /// removal is immediate; the physical delete is asynchronous.
    pub async fn delete(&self, record: SecretRecord) -> Result<()> {
        if !self.index.contains_key(&record.name) {
            warn!(secret = %record.name, "secret does not exist; cannot delete");
            return Ok(());
        }

        trace!(secret = %record.name, queue_len = self.queues.delete.depth().len(),
            "queueing secret for physical deletion");
        self.queues.delete.send(record.clone()).await?;

        if record
            .mirror_eligible(&self.config.cluster.mirror_prefix, &self.config.cluster.raw_prefix)
        {
            self.queues.cluster_delete.send(record.clone()).await?;
        }

        self.status.decrement(&record.name, |name| self.index.contains_key(name));
        self.index.remove(&record.name);

        Ok(())
    }

    /// Read a secret by name.
    ///
    /// Served from the index when present; otherwise hydrated from the
    /// file backing store. Unknown names and failed hydrations both read
    /// as `None`; the failure detail lives in the log.
    pub async fn read(&self, name: &str) -> Option<SecretRecord> {
        if let Some(entry) = self.index.get(name) {
            trace!(secret = name, "serving secret from memory");
            return Some(entry.clone());
        }

        match self.file_adapter.read(name).await {
            Ok(Some(record)) => {
                trace!(secret = name, "hydrated secret from disk");
                self.status.increment(name, |n| self.index.contains_key(n));
                self.index.insert(record.name.clone(), record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(secret = name, error = %e, "failed to hydrate secret from disk");
                None
            }
        }
    }

    /// All currently indexed records, after a lazy repopulation from the
    /// backing store if one has never succeeded.
    pub async fn list(&self) -> Vec<SecretRecord> {
        self.ensure_populated().await;
        self.index.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Metadata-only projections of all indexed records; safe to expose
    /// without revealing values.
    pub async fn list_views(&self) -> Vec<SecretView> {
        self.ensure_populated().await;
        self.index.iter().map(|entry| SecretView::from(entry.value())).collect()
    }

    /// All indexed records with each value individually passed through the
    /// encryption codec.
    pub async fn list_encrypted(&self) -> Vec<EncryptedSecretRecord> {
        self.ensure_populated().await;

        self.index
            .iter()
            .map(|entry| {
                let record = entry.value();
                let encrypted_values = record
                    .values
                    .iter()
                    .filter_map(|value| match self.codec.encrypt_value(value) {
                        Ok(encrypted) => Some(encrypted),
                        Err(e) => {
                            warn!(secret = %record.name, error = %e,
                                "failed to encrypt value for listing");
                            None
                        }
                    })
                    .collect();

                EncryptedSecretRecord {
                    name: record.name.clone(),
                    encrypted_values,
                    created: record.created,
                    updated: record.updated,
                    not_before: record.not_before,
                    expires_after: record.expires_after,
                }
            })
            .collect()
    }

    /// True iff the reserved bootstrap secret exists, signalling that
    /// first-run initialization has completed.
    pub async fn is_keystone_initialized(&self) -> bool {
        self.read(KEYSTONE_SECRET_NAME).await.is_some()
    }

    /// Current secret count and queue depths
    pub fn status(&self) -> Status {
        self.status.snapshot()
    }

    /// Repopulate the index from the backing store at most once per
    /// process lifetime.
    ///
    /// The guard flag flips only on success, so a failed attempt is
    /// retried on the next call. Individual unreadable entries are logged
    /// and skipped by the adapter scan, never fatal.
    async fn ensure_populated(&self) {
        let mut populated = self.populated.lock().await;
        if *populated {
            return;
        }

        let records = match self.config.store.backing_store {
            BackingStoreKind::File => match self.file_adapter.scan().await {
                Ok(records) => Some(records),
                Err(e) => {
                    error!(error = %e, "failed to populate secrets from disk");
                    None
                }
            },
            BackingStoreKind::Relational => match &self.relational {
                Some(adapter) if adapter.ready().await => match adapter.scan().await {
                    Ok(records) => Some(records),
                    Err(e) => {
                        error!(error = %e, "failed to populate secrets from database");
                        None
                    }
                },
                _ => {
                    debug!("relational store not ready; deferring repopulation");
                    None
                }
            },
            _ => {
                trace!(backing_store = %self.config.store.backing_store,
                    "backing store does not support repopulation");
                None
            }
        };

        if let Some(records) = records {
            let mut restored = 0;
            for record in records {
                if self.index.contains_key(&record.name) {
                    continue;
                }
                self.status.increment(&record.name, |name| self.index.contains_key(name));
                self.index.insert(record.name.clone(), record);
                restored += 1;
            }
            debug!(restored, "populated secrets from backing store");
            *populated = true;
        }
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("secrets", &self.index.len())
            .field("backing_store", &self.config.store.backing_store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoConfig;
    use crate::crypto::generate_root_key;
    use crate::persistence::{build_channels, QueueReceivers};
    use std::path::Path;

    fn test_store(
        data_dir: &Path,
        kind: BackingStoreKind,
        set_root_key: bool,
    ) -> (SecretStore, QueueReceivers) {
        test_store_with_key(
            data_dir,
            kind,
            set_root_key.then(|| generate_root_key().unwrap().combine()).as_deref(),
        )
    }

    fn test_store_with_key(
        data_dir: &Path,
        kind: BackingStoreKind,
        key_material: Option<&str>,
    ) -> (SecretStore, QueueReceivers) {
        let mut config = AppConfig::default();
        config.store.backing_store = kind;
        config.store.data_dir = data_dir.to_path_buf();
        let config = Arc::new(config);

        let root_key = Arc::new(RootKeyManager::new());
        if let Some(material) = key_material {
            root_key.set(material);
        }
        let codec = Arc::new(EncryptionCodec::new(Arc::clone(&root_key), &CryptoConfig::default()));
        let file_adapter =
            Arc::new(FileStoreAdapter::new(data_dir, config.store.backup_count, Arc::clone(&codec)));

        let (queues, receivers) = build_channels(&config.queue);
        let store = SecretStore::new(config, root_key, codec, file_adapter, None, queues);
        (store, receivers)
    }

    #[tokio::test]
    async fn test_upsert_rejected_while_root_key_unset() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut receivers) = test_store(dir.path(), BackingStoreKind::Memory, false);

        let result = store.upsert(SecretRecord::new("db-pass", vec!["v".to_string()]), false).await;
        assert!(matches!(result, Err(KeyplaneError::Config(_))));

        // No memory-only state was mutated and nothing was enqueued.
        assert!(store.read("db-pass").await.is_none());
        assert_eq!(store.status().num_secrets, 0);
        assert!(receivers.upsert.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_upsert_then_read_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        store.upsert(SecretRecord::new("db-pass", vec!["s3cr3t".to_string()]), false).await.unwrap();

        let record = store.read("db-pass").await.unwrap();
        assert!(record.value_transformed.contains("s3cr3t"));
        assert_eq!(record.created, record.updated);
        assert_eq!(store.status().num_secrets, 1);
    }

    #[tokio::test]
    async fn test_all_empty_values_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        let record = SecretRecord::new("blank", vec!["".to_string(), "".to_string()]);
        store.upsert(record, false).await.unwrap();

        assert!(store.read("blank").await.is_none());
        assert_eq!(store.status().num_secrets, 0);
        assert!(receivers.upsert.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_append_unions_values_new_first() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        store.upsert(SecretRecord::new("s", vec!["a".to_string()]), false).await.unwrap();
        let created = store.read("s").await.unwrap().created;

        store.upsert(SecretRecord::new("s", vec!["b".to_string()]), true).await.unwrap();

        let record = store.read("s").await.unwrap();
        assert_eq!(record.values, vec!["b", "a"]);
        assert_eq!(record.created, created);
        assert!(record.updated >= created);

        // Appending a duplicate leaves the set unchanged.
        store.upsert(SecretRecord::new("s", vec!["a".to_string()]), true).await.unwrap();
        assert_eq!(store.read("s").await.unwrap().values, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_replace_without_append() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        store.upsert(SecretRecord::new("s", vec!["old".to_string()]), false).await.unwrap();
        store.upsert(SecretRecord::new("s", vec!["new".to_string()]), false).await.unwrap();
        assert_eq!(store.read("s").await.unwrap().values, vec!["new"]);
        assert_eq!(store.status().num_secrets, 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_name_enqueues_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        store.delete(SecretRecord::new("ghost", vec![])).await.unwrap();
        assert!(receivers.delete.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_and_enqueues() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        let record = SecretRecord::new("doomed", vec!["v".to_string()]);
        store.upsert(record.clone(), false).await.unwrap();
        store.delete(record).await.unwrap();

        assert!(store.read("doomed").await.is_none());
        assert_eq!(store.status().num_secrets, 0);
        assert_eq!(receivers.delete.try_recv().map(|r| r.name), Some("doomed".to_string()));
    }

    #[tokio::test]
    async fn test_mirror_prefixed_secret_feeds_cluster_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        store
            .upsert(SecretRecord::new("cluster:creds", vec!["v".to_string()]), false)
            .await
            .unwrap();
        store.upsert(SecretRecord::new("plain", vec!["v".to_string()]), false).await.unwrap();

        let mirrored: Vec<String> =
            std::iter::from_fn(|| receivers.cluster_upsert.try_recv().map(|r| r.name)).collect();
        assert_eq!(mirrored, vec!["cluster:creds"]);
    }

    #[tokio::test]
    async fn test_keystone_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        assert!(!store.is_keystone_initialized().await);
        store
            .upsert(SecretRecord::new(KEYSTONE_SECRET_NAME, vec!["up".to_string()]), false)
            .await
            .unwrap();
        assert!(store.is_keystone_initialized().await);
    }

    #[tokio::test]
    async fn test_list_encrypted_values_decrypt_back() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        store.upsert(SecretRecord::new("s", vec!["hidden".to_string()]), false).await.unwrap();

        let listed = store.list_encrypted().await;
        assert_eq!(listed.len(), 1);
        assert_ne!(listed[0].encrypted_values[0], "hidden");

        let decrypted = store.codec.decrypt_value(&listed[0].encrypted_values[0]).unwrap();
        assert_eq!(decrypted, "hidden");
    }

    #[tokio::test]
    async fn test_list_views_omit_values() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _receivers) = test_store(dir.path(), BackingStoreKind::Memory, true);

        store.upsert(SecretRecord::new("s", vec!["v".to_string()]), false).await.unwrap();
        let views = store.list_views().await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "s");
    }

    #[tokio::test]
    async fn test_populate_restores_index_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key_material = generate_root_key().unwrap().combine();

        // A previous process wrote two secrets to disk.
        {
            let (store, _receivers) =
                test_store_with_key(dir.path(), BackingStoreKind::File, Some(&key_material));
            store.file_adapter.upsert(&SecretRecord::new("a", vec!["1".to_string()])).await.unwrap();
            store.file_adapter.upsert(&SecretRecord::new("b", vec!["2".to_string()])).await.unwrap();
        }

        // A fresh store with an empty index repopulates lazily on list.
        let (store, _receivers) =
            test_store_with_key(dir.path(), BackingStoreKind::File, Some(&key_material));
        let mut names: Vec<String> = store.list().await.into_iter().map(|r| r.name).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.status().num_secrets, 2);
    }

    #[tokio::test]
    async fn test_read_hydrates_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key_material = generate_root_key().unwrap().combine();

        {
            let (store, _receivers) =
                test_store_with_key(dir.path(), BackingStoreKind::File, Some(&key_material));
            store
                .file_adapter
                .upsert(&SecretRecord::new("cold", vec!["v".to_string()]))
                .await
                .unwrap();
        }

        let (store, _receivers) =
            test_store_with_key(dir.path(), BackingStoreKind::File, Some(&key_material));
        let record = store.read("cold").await.unwrap();
        assert_eq!(record.values, vec!["v"]);
        assert_eq!(store.status().num_secrets, 1);
    }
}

//! Cluster object backing store
//!
//! Mirrors eligible secrets into cluster-native key/value objects, one per
//! configured namespace, through a client supplied by the environment.
//! Only records whose name carries the mirror prefix (or whose metadata
//! opts in) are eligible; records under the raw prefix never mirror.

use crate::adapters::BackingStoreAdapter;
use crate::domain::{BackingStoreKind, SecretRecord};
use crate::errors::{KeyplaneError, Result};
use crate::persistence::{retry, RetryPolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A cluster-native key/value object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterObject {
    pub namespace: String,
    pub name: String,
    pub data: HashMap<String, Vec<u8>>,
}

/// Client for the cluster object store, supplied by the environment.
///
/// Implementations must be Send + Sync for use from the persistence
/// workers.
#[async_trait]
pub trait ClusterObjectClient: Send + Sync + std::fmt::Debug {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ClusterObject>>;
    async fn create(&self, namespace: &str, name: &str, data: HashMap<String, Vec<u8>>)
        -> Result<()>;
    async fn update(&self, namespace: &str, name: &str, data: HashMap<String, Vec<u8>>)
        -> Result<()>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Cluster object backing store adapter
#[derive(Debug)]
pub struct ClusterObjectAdapter {
    client: Arc<dyn ClusterObjectClient>,
    mirror_prefix: String,
    raw_prefix: String,
    /// Deleting cluster objects is destructive and therefore opt-in
    delete_enabled: bool,
    retry_policy: RetryPolicy,
}

impl ClusterObjectAdapter {
    pub fn new(
        client: Arc<dyn ClusterObjectClient>,
        mirror_prefix: impl Into<String>,
        raw_prefix: impl Into<String>,
        delete_enabled: bool,
    ) -> Self {
        Self {
            client,
            mirror_prefix: mirror_prefix.into(),
            raw_prefix: raw_prefix.into(),
            delete_enabled,
            retry_policy: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Whether a record may be mirrored into cluster objects
    pub fn eligible(&self, record: &SecretRecord) -> bool {
        record.mirror_eligible(&self.mirror_prefix, &self.raw_prefix)
    }

    /// Object name: the record name with the mirror prefix stripped
    fn object_name<'a>(&self, record: &'a SecretRecord) -> &'a str {
        record.name.strip_prefix(&self.mirror_prefix).unwrap_or(&record.name)
    }

    fn namespaces(record: &SecretRecord) -> Vec<String> {
        let namespaces: Vec<String> = record
            .meta
            .namespaces
            .iter()
            .map(|ns| if ns.is_empty() { "default".to_string() } else { ns.clone() })
            .collect();
        if namespaces.is_empty() {
            vec!["default".to_string()]
        } else {
            namespaces
        }
    }
}

#[async_trait]
impl BackingStoreAdapter for ClusterObjectAdapter {
    fn kind(&self) -> BackingStoreKind {
        BackingStoreKind::Cluster
    }

    async fn upsert(&self, record: &SecretRecord) -> Result<()> {
        if !self.eligible(record) {
            return Err(KeyplaneError::config(format!(
                "secret {} is not eligible for cluster mirroring",
                record.name
            )));
        }

        let name = self.object_name(record);
        let data = record.to_cluster_payload();

        for namespace in Self::namespaces(record) {
            let existing = self.client.get(&namespace, name).await?;

            if existing.is_none() {
                retry("cluster-create", &self.retry_policy, || {
                    self.client.create(&namespace, name, data.clone())
                })
                .await?;
                debug!(namespace = %namespace, object = name, "created cluster object");
            } else {
                retry("cluster-update", &self.retry_policy, || {
                    self.client.update(&namespace, name, data.clone())
                })
                .await?;
                debug!(namespace = %namespace, object = name, "updated cluster object");
            }
        }

        Ok(())
    }

    async fn delete(&self, record: &SecretRecord) -> Result<()> {
        if !self.delete_enabled {
            trace!(secret = %record.name, "cluster object deletion is disabled; skipping");
            return Ok(());
        }
        if !self.eligible(record) {
            return Ok(());
        }

        let name = self.object_name(record);
        for namespace in Self::namespaces(record) {
            // Get first and only delete what exists, so repeated deletes
            // stay idempotent.
            if self.client.get(&namespace, name).await?.is_some() {
                retry("cluster-delete", &self.retry_policy, || {
                    self.client.delete(&namespace, name)
                })
                .await?;
                debug!(namespace = %namespace, object = name, "deleted cluster object");
            } else {
                trace!(namespace = %namespace, object = name, "cluster object absent; nothing to delete");
            }
        }

        Ok(())
    }
}

/// In-memory cluster object client for tests and local development.
#[derive(Debug, Default)]
pub struct MockClusterClient {
    objects: std::sync::Mutex<HashMap<(String, String), HashMap<String, Vec<u8>>>>,
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<HashMap<String, Vec<u8>>> {
        self.lock().get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), HashMap<String, Vec<u8>>>> {
        match self.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ClusterObjectClient for MockClusterClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ClusterObject>> {
        Ok(self.lock().get(&(namespace.to_string(), name.to_string())).map(|data| {
            ClusterObject {
                namespace: namespace.to_string(),
                name: name.to_string(),
                data: data.clone(),
            }
        }))
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        data: HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        self.lock().insert((namespace.to_string(), name.to_string()), data);
        Ok(())
    }

    async fn update(
        &self,
        namespace: &str,
        name: &str,
        data: HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        self.lock().insert((namespace.to_string(), name.to_string()), data);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.lock().remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter(client: Arc<MockClusterClient>, delete_enabled: bool) -> ClusterObjectAdapter {
        ClusterObjectAdapter::new(client, "cluster:", "raw:", delete_enabled).with_retry_policy(
            RetryPolicy {
                max_retries: 1,
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
            },
        )
    }

    #[test]
    fn test_eligibility() {
        let client = Arc::new(MockClusterClient::new());
        let adapter = test_adapter(client, false);

        assert!(adapter.eligible(&SecretRecord::new("cluster:creds", vec![])));
        assert!(!adapter.eligible(&SecretRecord::new("plain", vec![])));
        assert!(!adapter.eligible(&SecretRecord::new("raw:hidden", vec![])));

        let mut flagged = SecretRecord::new("plain", vec![]);
        flagged.meta.mirror = true;
        assert!(adapter.eligible(&flagged));
    }

    #[tokio::test]
    async fn test_upsert_creates_per_namespace() {
        let client = Arc::new(MockClusterClient::new());
        let adapter = test_adapter(client.clone(), false);

        let mut record =
            SecretRecord::new("cluster:creds", vec![r#"{"user":"admin"}"#.to_string()]);
        record.meta.namespaces = vec!["team-a".to_string(), "team-b".to_string()];

        adapter.upsert(&record).await.unwrap();
        assert_eq!(client.len(), 2);
        let object = client.object("team-a", "creds").unwrap();
        assert_eq!(object.get("user"), Some(&b"admin".to_vec()));
    }

    #[tokio::test]
    async fn test_upsert_updates_existing() {
        let client = Arc::new(MockClusterClient::new());
        let adapter = test_adapter(client.clone(), false);

        let record = SecretRecord::new("cluster:token", vec!["one".to_string()]);
        adapter.upsert(&record).await.unwrap();

        let record = SecretRecord::new("cluster:token", vec!["two".to_string()]);
        adapter.upsert(&record).await.unwrap();

        assert_eq!(client.len(), 1);
        let object = client.object("default", "token").unwrap();
        assert_eq!(object.get("VALUE"), Some(&b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_ineligible_record_is_rejected() {
        let client = Arc::new(MockClusterClient::new());
        let adapter = test_adapter(client, false);
        let record = SecretRecord::new("plain", vec!["v".to_string()]);
        assert!(matches!(adapter.upsert(&record).await, Err(KeyplaneError::Config(_))));
    }

    #[tokio::test]
    async fn test_delete_gated_by_flag() {
        let client = Arc::new(MockClusterClient::new());
        let record = SecretRecord::new("cluster:token", vec!["v".to_string()]);

        let adapter = test_adapter(client.clone(), false);
        adapter.upsert(&record).await.unwrap();
        adapter.delete(&record).await.unwrap();
        assert_eq!(client.len(), 1, "deletion disabled; object must remain");

        let adapter = test_adapter(client.clone(), true);
        adapter.delete(&record).await.unwrap();
        assert!(client.is_empty());

        // Deleting an absent object is an idempotent no-op.
        adapter.delete(&record).await.unwrap();
    }
}

//! Relational backing store
//!
//! Persists secrets into a single table keyed by name, each row holding the
//! base64-encoded ciphertext of the serialized record. The pool is attached
//! after construction, once the database has warmed up; workers poll
//! [`BackingStoreAdapter::ready`] and park queued items until it reports
//! true.

use crate::adapters::BackingStoreAdapter;
use crate::crypto::EncryptionCodec;
use crate::domain::{BackingStoreKind, SecretRecord};
use crate::errors::{KeyplaneError, Result};
use async_trait::async_trait;
use base64::Engine;
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Connection pool handle for the relational backing store
pub type DbPool = sqlx::Pool<sqlx::Sqlite>;

/// Relational backing store adapter
#[derive(Debug)]
pub struct RelationalStoreAdapter {
    pool: RwLock<Option<DbPool>>,
    codec: Arc<EncryptionCodec>,
}

impl RelationalStoreAdapter {
    pub fn new(codec: Arc<EncryptionCodec>) -> Self {
        Self { pool: RwLock::new(None), codec }
    }

    /// Attach the connection pool and create the secrets table if needed.
    /// The adapter reports ready only after this succeeds.
    pub async fn attach(&self, pool: DbPool) -> Result<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS secrets (name TEXT PRIMARY KEY, data TEXT NOT NULL)")
            .execute(&pool)
            .await
            .map_err(|e| KeyplaneError::database(e, "failed to create secrets table"))?;

        *self.pool.write().await = Some(pool);
        debug!("relational backing store attached");
        Ok(())
    }

    async fn pool(&self) -> Result<DbPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| KeyplaneError::internal("relational store has no pool attached"))
    }

    fn encode(&self, record: &SecretRecord) -> Result<String> {
        let data = serde_json::to_vec(record)?;
        let ciphertext = self.codec.encrypt(&data)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(ciphertext))
    }

    fn decode(&self, name: &str, encoded: &str) -> Result<SecretRecord> {
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| KeyplaneError::crypto(format!("invalid base64 row for {}: {}", name, e)))?;
        let plaintext = self.codec.decrypt(&ciphertext)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| KeyplaneError::serialization(e, format!("stored secret {}", name)))
    }

    /// Read every secret row. Rows that fail to decode, decrypt, or parse
    /// are logged and skipped.
    pub async fn scan(&self) -> Result<Vec<SecretRecord>> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT name, data FROM secrets")
            .fetch_all(&pool)
            .await
            .map_err(|e| KeyplaneError::database(e, "failed to scan secrets table"))?;

        let mut records = Vec::new();
        for row in rows {
            let name: String = row.get("name");
            let data: String = row.get("data");
            match self.decode(&name, &data) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(secret = %name, error = %e, "skipping undecodable secret row");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl BackingStoreAdapter for RelationalStoreAdapter {
    fn kind(&self) -> BackingStoreKind {
        BackingStoreKind::Relational
    }

    async fn upsert(&self, record: &SecretRecord) -> Result<()> {
        let encoded = self.encode(record)?;
        let pool = self.pool().await?;

        sqlx::query(
            "INSERT INTO secrets (name, data) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET data = excluded.data",
        )
        .bind(&record.name)
        .bind(&encoded)
        .execute(&pool)
        .await
        .map_err(|e| KeyplaneError::database(e, format!("failed to upsert {}", record.name)))?;

        debug!(secret = %record.name, "persisted secret to database");
        Ok(())
    }

    async fn delete(&self, record: &SecretRecord) -> Result<()> {
        let pool = self.pool().await?;
        sqlx::query("DELETE FROM secrets WHERE name = ?1")
            .bind(&record.name)
            .execute(&pool)
            .await
            .map_err(|e| KeyplaneError::database(e, format!("failed to delete {}", record.name)))?;
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<SecretRecord>> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT data FROM secrets WHERE name = ?1")
            .bind(name)
            .fetch_optional(&pool)
            .await
            .map_err(|e| KeyplaneError::database(e, format!("failed to read {}", name)))?;

        match row {
            Some(row) => {
                let data: String = row.get("data");
                Ok(Some(self.decode(name, &data)?))
            }
            None => Ok(None),
        }
    }

    async fn ready(&self) -> bool {
        let Some(pool) = self.pool.read().await.clone() else {
            return false;
        };
        sqlx::query("SELECT 1").execute(&pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoConfig;
    use crate::crypto::{generate_root_key, RootKeyManager};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> DbPool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn test_codec() -> Arc<EncryptionCodec> {
        let root_key = Arc::new(RootKeyManager::new());
        root_key.set(&generate_root_key().unwrap().combine());
        Arc::new(EncryptionCodec::new(root_key, &CryptoConfig::default()))
    }

    #[tokio::test]
    async fn test_not_ready_until_attached() {
        let adapter = RelationalStoreAdapter::new(test_codec());
        assert!(!adapter.ready().await);

        adapter.attach(memory_pool().await).await.unwrap();
        assert!(adapter.ready().await);
    }

    #[tokio::test]
    async fn test_upsert_then_read_roundtrip() {
        let adapter = RelationalStoreAdapter::new(test_codec());
        adapter.attach(memory_pool().await).await.unwrap();

        let record = SecretRecord::new("db-pass", vec!["s3cr3t".to_string()]);
        adapter.upsert(&record).await.unwrap();

        let read_back = adapter.read("db-pass").await.unwrap().unwrap();
        assert_eq!(read_back.name, "db-pass");
        assert_eq!(read_back.values, vec!["s3cr3t"]);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_on_conflict() {
        let adapter = RelationalStoreAdapter::new(test_codec());
        adapter.attach(memory_pool().await).await.unwrap();

        adapter.upsert(&SecretRecord::new("k", vec!["one".to_string()])).await.unwrap();
        adapter.upsert(&SecretRecord::new("k", vec!["two".to_string()])).await.unwrap();

        let read_back = adapter.read("k").await.unwrap().unwrap();
        assert_eq!(read_back.values, vec!["two"]);

        let records = adapter.scan().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_fine() {
        let adapter = RelationalStoreAdapter::new(test_codec());
        adapter.attach(memory_pool().await).await.unwrap();
        adapter.delete(&SecretRecord::new("ghost", vec![])).await.unwrap();
        assert!(adapter.read("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rows_are_ciphertext() {
        let adapter = RelationalStoreAdapter::new(test_codec());
        let pool = memory_pool().await;
        adapter.attach(pool.clone()).await.unwrap();

        adapter.upsert(&SecretRecord::new("k", vec!["plaintext".to_string()])).await.unwrap();

        let row = sqlx::query("SELECT data FROM secrets WHERE name = 'k'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let data: String = row.get("data");
        assert!(!data.contains("plaintext"));
    }
}

//! File backing store
//!
//! Persists each secret as one encrypted file under the data directory,
//! plus up to N rotating backup copies for resilience against a corrupted
//! latest write. The rotation index only advances after a backup write
//! succeeds; a failed backup never blocks the next primary write.

use crate::adapters::BackingStoreAdapter;
use crate::crypto::EncryptionCodec;
use crate::domain::{BackingStoreKind, SecretRecord};
use crate::errors::{KeyplaneError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, trace};

/// Extension of primary secret files
pub const SECRET_FILE_EXTENSION: &str = ".vault";

/// Suffix of rotating backup files
pub const BACKUP_FILE_SUFFIX: &str = ".vault.backup";

/// Delay before the single in-place write retry
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// File backing store adapter
#[derive(Debug)]
pub struct FileStoreAdapter {
    data_dir: PathBuf,
    backup_count: u32,
    codec: Arc<EncryptionCodec>,
    /// Last successfully written backup index per secret name
    last_backup_index: Mutex<HashMap<String, u32>>,
}

impl FileStoreAdapter {
    pub fn new<P: Into<PathBuf>>(
        data_dir: P,
        backup_count: u32,
        codec: Arc<EncryptionCodec>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            backup_count: backup_count.max(1),
            codec,
            last_backup_index: Mutex::new(HashMap::new()),
        }
    }

    fn primary_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}", name, SECRET_FILE_EXTENSION))
    }

    fn backup_path(&self, name: &str, index: u32) -> PathBuf {
        self.data_dir.join(format!("{}-{}-{}", name, index, BACKUP_FILE_SUFFIX))
    }

    /// Encrypt and write, retrying once in place after a short delay.
    /// The retry also absorbs the codec's IV throttle when a backup write
    /// follows its primary too closely in symmetric mode.
    async fn write_encrypted(&self, path: &Path, plaintext: &[u8]) -> Result<()> {
        match self.encrypt_and_write(path, plaintext).await {
            Ok(()) => Ok(()),
            Err(first) => {
                trace!(path = %path.display(), error = %first, "write failed; retrying once");
                tokio::time::sleep(WRITE_RETRY_DELAY).await;
                self.encrypt_and_write(path, plaintext).await
            }
        }
    }

    async fn encrypt_and_write(&self, path: &Path, plaintext: &[u8]) -> Result<()> {
        let ciphertext = self.codec.encrypt(plaintext)?;
        tokio::fs::write(path, ciphertext)
            .await
            .map_err(|e| KeyplaneError::io(e, format!("failed to write {}", path.display())))
    }

    /// Read every non-backup secret file in the data directory.
    ///
    /// Individual files that fail to read, decrypt, or parse are logged
    /// and skipped; they never abort the scan.
    pub async fn scan(&self) -> Result<Vec<SecretRecord>> {
        let mut entries = tokio::fs::read_dir(&self.data_dir).await.map_err(|e| {
            KeyplaneError::io(e, format!("failed to read data dir {}", self.data_dir.display()))
        })?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KeyplaneError::io(e, "failed to iterate data dir"))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.ends_with(BACKUP_FILE_SUFFIX)
                || !file_name.ends_with(SECRET_FILE_EXTENSION)
            {
                continue;
            }

            let name = file_name.trim_end_matches(SECRET_FILE_EXTENSION);
            match self.read(name).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    error!(secret = name, error = %e, "skipping unreadable secret file");
                }
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl BackingStoreAdapter for FileStoreAdapter {
    fn kind(&self) -> BackingStoreKind {
        BackingStoreKind::File
    }

    async fn upsert(&self, record: &SecretRecord) -> Result<()> {
        let data = serde_json::to_vec(record)?;

        self.write_encrypted(&self.primary_path(&record.name), &data).await?;
        debug!(secret = %record.name, "persisted secret to disk");

        // Rotating backup copy. Failures are isolated: the error goes to
        // the log, the rotation index stays put, and the primary write
        // above already succeeded.
        let last_index = {
            let guard = match self.last_backup_index.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.get(&record.name).copied().unwrap_or(0)
        };
        let next_index = (last_index + 1) % self.backup_count;

        match self.write_encrypted(&self.backup_path(&record.name, next_index), &data).await {
            Ok(()) => {
                let mut guard = match self.last_backup_index.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.insert(record.name.clone(), next_index);
            }
            Err(e) => {
                error!(secret = %record.name, index = next_index, error = %e,
                    "backup write failed; rotation index not advanced");
            }
        }

        Ok(())
    }

    async fn delete(&self, record: &SecretRecord) -> Result<()> {
        let path = self.primary_path(&record.name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(secret = %record.name, "removed secret from disk");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeyplaneError::io(e, format!("failed to remove {}", path.display()))),
        }
    }

    async fn read(&self, name: &str) -> Result<Option<SecretRecord>> {
        let path = self.primary_path(name);
        let ciphertext = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeyplaneError::io(e, format!("failed to read {}", path.display())))
            }
        };

        let plaintext = self.codec.decrypt(&ciphertext)?;
        let record: SecretRecord = serde_json::from_slice(&plaintext)
            .map_err(|e| KeyplaneError::serialization(e, format!("stored secret {}", name)))?;
        Ok(Some(record))
    }
}

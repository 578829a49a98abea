//! Backing store adapter trait
//!
//! Defines the core interface for pluggable backing stores.

use crate::domain::{BackingStoreKind, SecretRecord};
use crate::errors::Result;
use async_trait::async_trait;

/// Trait for backing store adapters.
///
/// Implementations must be Send + Sync for use from the persistence
/// workers. Adapters own no record state; they receive each record by
/// reference and never read the in-memory index.
#[async_trait]
pub trait BackingStoreAdapter: Send + Sync + std::fmt::Debug {
    /// Get the backing store kind this adapter serves
    fn kind(&self) -> BackingStoreKind;

    /// Durably write (insert or update) a secret record
    async fn upsert(&self, record: &SecretRecord) -> Result<()>;

    /// Remove a secret record. Removing a record that does not exist is
    /// not an error.
    async fn delete(&self, record: &SecretRecord) -> Result<()>;

    /// Read a record back by name. Stores without read-back support
    /// return `None`.
    async fn read(&self, _name: &str) -> Result<Option<SecretRecord>> {
        Ok(None)
    }

    /// Whether the store is ready to accept writes. Workers park queued
    /// items and poll this while it reports false.
    async fn ready(&self) -> bool {
        true
    }
}

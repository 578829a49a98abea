//! Backing store adapter registry
//!
//! Resolves the adapter for a backing store kind. Kinds without a
//! registered adapter (the not-yet-implemented cloud providers among them)
//! resolve to a typed unsupported error rather than a panic, so a
//! misconfigured store fails loudly without taking the worker down.

use super::backend::BackingStoreAdapter;
use crate::domain::BackingStoreKind;
use crate::errors::{KeyplaneError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of backing store adapters keyed by kind
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<BackingStoreKind, Arc<dyn BackingStoreAdapter>>,
}

impl AdapterRegistry {
    /// Create a new registry with no adapters
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind
    pub fn register(&mut self, adapter: Arc<dyn BackingStoreAdapter>) {
        let kind = adapter.kind();
        info!(backing_store = %kind, "Registering backing store adapter");
        self.adapters.insert(kind, adapter);
    }

    /// Check if an adapter is registered for a kind
    pub fn has_adapter(&self, kind: BackingStoreKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Get list of registered backing store kinds
    pub fn registered_kinds(&self) -> Vec<BackingStoreKind> {
        self.adapters.keys().copied().collect()
    }

    /// Resolve the adapter for a kind.
    ///
    /// `memory` never resolves: it means no persistence and must be
    /// handled before dispatch.
    pub fn get(&self, kind: BackingStoreKind) -> Result<Arc<dyn BackingStoreAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| KeyplaneError::unsupported_backing_store(kind.as_str()))
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

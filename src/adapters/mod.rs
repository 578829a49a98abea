//! Backing store adapters.
//!
//! Each adapter knows how to durably write and delete a secret record in
//! one kind of backing store. Adapters sit behind the
//! [`BackingStoreAdapter`] trait and are resolved through the
//! [`AdapterRegistry`]; a kind with no registered adapter yields a typed
//! unsupported error instead of aborting the process.

mod backend;
mod cluster;
mod file;
mod registry;
mod relational;

pub use backend::BackingStoreAdapter;
pub use cluster::{ClusterObject, ClusterObjectAdapter, ClusterObjectClient, MockClusterClient};
pub use file::FileStoreAdapter;
pub use registry::AdapterRegistry;
pub use relational::{DbPool, RelationalStoreAdapter};

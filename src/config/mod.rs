//! Configuration management for the Keyplane data plane.

mod settings;

pub use settings::{
    AppConfig, ClusterConfig, CryptoConfig, QueueConfig, StoreConfig,
};

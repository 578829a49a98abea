//! Domain model for the Keyplane data plane.

mod secret;
pub mod template;

pub use secret::{
    BackingStoreKind, EncryptedSecretRecord, SecretFormat, SecretMeta, SecretRecord, SecretView,
    KEYSTONE_SECRET_NAME,
};

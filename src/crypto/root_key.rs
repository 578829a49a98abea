//! Root key lifecycle
//!
//! The root key is the triplet of cryptographic material every encryption
//! operation derives from: an asymmetric key pair plus a symmetric seed,
//! serialized as three newline-joined strings. It is set exactly once for
//! the process lifetime; rotating it requires a restart.

use std::sync::RwLock;
use tracing::warn;

/// Separator between the three parts of the serialized root key
const ROOT_KEY_SEPARATOR: &str = "\n";

/// The three components of the root key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootKeyTriplet {
    /// Asymmetric private key (decryption)
    pub private_key: String,
    /// Asymmetric public key (encryption)
    pub public_key: String,
    /// Hex-encoded symmetric seed
    pub symmetric_seed: String,
}

impl RootKeyTriplet {
    /// Serialize the triplet into its newline-joined form
    pub fn combine(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.private_key,
            self.public_key,
            self.symmetric_seed,
            sep = ROOT_KEY_SEPARATOR
        )
    }

    /// True when no component is set
    pub fn is_empty(&self) -> bool {
        self.private_key.is_empty()
            && self.public_key.is_empty()
            && self.symmetric_seed.is_empty()
    }
}

/// Owner of the root key material for the process lifetime.
///
/// Reads vastly outnumber the single write, so the serialized key sits
/// behind a read/write lock.
#[derive(Debug, Default)]
pub struct RootKeyManager {
    key: RwLock<String>,
}

impl RootKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the combined key material iff it is currently unset.
    ///
    /// A second set attempt is logged and ignored; the process must be
    /// restarted to rotate the root key.
    pub fn set(&self, serialized: &str) {
        let mut guard = match self.key.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !guard.is_empty() {
            warn!("Root key already set; ignoring");
            return;
        }

        *guard = serialized.to_string();
    }

    /// True once the root key has been set
    pub fn is_set(&self) -> bool {
        let guard = match self.key.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        !guard.is_empty()
    }

    /// Split the stored key into its three components.
    ///
    /// Returns an empty triplet when the key is unset or does not split
    /// into exactly three newline-separated parts. Never panics on
    /// malformed input.
    pub fn triplet(&self) -> RootKeyTriplet {
        let guard = match self.key.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if guard.is_empty() {
            return RootKeyTriplet::default();
        }

        let parts: Vec<&str> = guard.split(ROOT_KEY_SEPARATOR).collect();
        if parts.len() != 3 {
            return RootKeyTriplet::default();
        }

        RootKeyTriplet {
            private_key: parts[0].to_string(),
            public_key: parts[1].to_string(),
            symmetric_seed: parts[2].to_string(),
        }
    }
}

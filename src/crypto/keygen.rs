//! Root key generation
//!
//! Produces a fresh root key triplet: an X25519 identity/recipient pair for
//! the asymmetric scheme and a random 256-bit seed, hex encoded, for the
//! symmetric one.

use crate::crypto::RootKeyTriplet;
use crate::errors::Result;
use age::secrecy::ExposeSecret;
use rand::RngCore;

/// Generate a fresh root key triplet.
pub fn generate_root_key() -> Result<RootKeyTriplet> {
    let identity = age::x25519::Identity::generate();
    let public_key = identity.to_public().to_string();
    let private_key = identity.to_string().expose_secret().to_string();

    Ok(RootKeyTriplet {
        private_key,
        public_key,
        symmetric_seed: generate_symmetric_seed(),
    })
}

/// Generate a random 256-bit symmetric seed as a hex string.
fn generate_symmetric_seed() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    hex::encode(key)
}

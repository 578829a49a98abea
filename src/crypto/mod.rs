//! Cryptography for the Keyplane data plane.
//!
//! The root key manager owns the process-lifetime key material; the codec
//! derives every encryption operation from it, selecting the asymmetric or
//! symmetric algorithm by compliance mode.

mod codec;
mod keygen;
mod root_key;

pub use codec::EncryptionCodec;
pub use keygen::generate_root_key;
pub use root_key::{RootKeyManager, RootKeyTriplet};

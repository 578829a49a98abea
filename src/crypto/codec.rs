//! Dual-algorithm encryption codec
//!
//! Encrypts and decrypts byte payloads with the algorithm selected by the
//! compliance mode: X25519 (age) in the default mode, AES-256-GCM in
//! FIPS-compliant mode. All key material comes from the root key manager;
//! every operation refuses to proceed while the root key is unset.
//!
//! In symmetric mode a fresh random nonce is generated per call and
//! prepended to the ciphertext. Generating nonces under call pressure
//! degrades their randomness, so calls arriving faster than the configured
//! minimum interval are rejected with a rate-limit error.

use crate::config::CryptoConfig;
use crate::crypto::{RootKeyManager, RootKeyTriplet};
use crate::errors::{KeyplaneError, Result};
use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Size of the AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of the AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Encryption codec deriving all key material from the root key manager
pub struct EncryptionCodec {
    root_key: Arc<RootKeyManager>,
    fips_compliant: bool,
    iv_wait: Duration,
    last_symmetric_encrypt: Mutex<Option<Instant>>,
    rng: SystemRandom,
}

impl EncryptionCodec {
    pub fn new(root_key: Arc<RootKeyManager>, config: &CryptoConfig) -> Self {
        Self {
            root_key,
            fips_compliant: config.fips_compliant,
            iv_wait: config.iv_wait(),
            last_symmetric_encrypt: Mutex::new(None),
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt a byte payload with the algorithm selected by compliance mode
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let triplet = self.require_root_key()?;
        if self.fips_compliant {
            self.encrypt_symmetric(&triplet, plaintext)
        } else {
            self.encrypt_asymmetric(&triplet, plaintext)
        }
    }

    /// Decrypt a byte payload with the algorithm selected by compliance mode
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let triplet = self.require_root_key()?;
        if self.fips_compliant {
            self.decrypt_symmetric(&triplet, ciphertext)
        } else {
            self.decrypt_asymmetric(&triplet, ciphertext)
        }
    }

    /// Encrypt a string value and return the base64-encoded ciphertext
    pub fn encrypt_value(&self, value: &str) -> Result<String> {
        let ciphertext = self.encrypt(value.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(ciphertext))
    }

    /// Decrypt a base64-encoded ciphertext back into the original string
    pub fn decrypt_value(&self, value: &str) -> Result<String> {
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(value)
            .map_err(|e| KeyplaneError::crypto(format!("invalid base64 ciphertext: {}", e)))?;
        let plaintext = self.decrypt(&ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|e| KeyplaneError::crypto(format!("decrypted value is not UTF-8: {}", e)))
    }

    fn require_root_key(&self) -> Result<RootKeyTriplet> {
        let triplet = self.root_key.triplet();
        if triplet.is_empty() {
            return Err(KeyplaneError::config("root key not set"));
        }
        Ok(triplet)
    }

    fn encrypt_asymmetric(&self, triplet: &RootKeyTriplet, plaintext: &[u8]) -> Result<Vec<u8>> {
        let recipient = triplet
            .public_key
            .parse::<age::x25519::Recipient>()
            .map_err(|e| KeyplaneError::crypto(format!("failed to parse public key: {}", e)))?;

        age::encrypt(&recipient, plaintext)
            .map_err(|e| KeyplaneError::crypto(format!("asymmetric encryption failed: {}", e)))
    }

    fn decrypt_asymmetric(&self, triplet: &RootKeyTriplet, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(KeyplaneError::crypto("ciphertext is empty"));
        }

        let identity = triplet
            .private_key
            .parse::<age::x25519::Identity>()
            .map_err(|e| KeyplaneError::crypto(format!("failed to parse private key: {}", e)))?;

        age::decrypt(&identity, ciphertext)
            .map_err(|e| KeyplaneError::crypto(format!("asymmetric decryption failed: {}", e)))
    }

    fn encrypt_symmetric(&self, triplet: &RootKeyTriplet, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.throttle_symmetric_encrypt()?;

        let key_bytes = decode_symmetric_key(triplet)?;
        let unbound_key = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| KeyplaneError::crypto("failed to create encryption key"))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| KeyplaneError::crypto("failed to generate random nonce"))?;

        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| KeyplaneError::crypto("symmetric encryption failed"))?;

        // The nonce is unique, not secret. It travels at the front of the
        // ciphertext.
        let mut ciphertext = Vec::with_capacity(NONCE_SIZE + in_out.len());
        ciphertext.extend_from_slice(&nonce_bytes);
        ciphertext.extend_from_slice(&in_out);
        Ok(ciphertext)
    }

    fn decrypt_symmetric(&self, triplet: &RootKeyTriplet, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(KeyplaneError::crypto("ciphertext too short"));
        }

        let key_bytes = decode_symmetric_key(triplet)?;
        let unbound_key = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| KeyplaneError::crypto("failed to create decryption key"))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&ciphertext[..NONCE_SIZE]);

        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = ciphertext[NONCE_SIZE..].to_vec();
        let plaintext = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| KeyplaneError::crypto("symmetric decryption failed: authentication"))?;

        Ok(plaintext.to_vec())
    }

    fn throttle_symmetric_encrypt(&self) -> Result<()> {
        let mut last = match self.last_symmetric_encrypt.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(previous) = *last {
            if previous.elapsed() < self.iv_wait {
                return Err(KeyplaneError::rate_limited(
                    "symmetric encryption called too frequently",
                ));
            }
        }

        *last = Some(Instant::now());
        Ok(())
    }
}

/// Decode the hex symmetric seed. The returned buffer zeroizes itself when
/// dropped.
fn decode_symmetric_key(triplet: &RootKeyTriplet) -> Result<Zeroizing<Vec<u8>>> {
    let key_bytes = hex::decode(&triplet.symmetric_seed)
        .map_err(|e| KeyplaneError::crypto(format!("failed to decode symmetric seed: {}", e)))?;
    let key_bytes = Zeroizing::new(key_bytes);

    if key_bytes.len() != 32 {
        return Err(KeyplaneError::crypto(format!(
            "symmetric seed must be 32 bytes, got {}",
            key_bytes.len()
        )));
    }

    Ok(key_bytes)
}

impl std::fmt::Debug for EncryptionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionCodec")
            .field("fips_compliant", &self.fips_compliant)
            .field("iv_wait", &self.iv_wait)
            .field("root_key", &"[REDACTED]")
            .finish()
    }
}

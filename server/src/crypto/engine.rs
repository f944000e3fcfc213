//! AES-256-GCM sealing of asset payloads.
//!
//! Bundle format: version (1 byte) || nonce (12 bytes) || ciphertext (includes GCM tag)
//!
//! Keys are 32 random bytes. Their textual form (as stored in the vault) is
//! URL-safe base64 with padding.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::Rng;

/// Current bundle format version
pub const BUNDLE_VERSION: u8 = 0x01;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid asset key: {0}")]
    InvalidKey(String),

    /// Integrity check failed: wrong key or tampered bundle.
    #[error("authentication failed: wrong key or corrupted ciphertext")]
    Authentication,

    #[error("malformed ciphertext bundle: {0}")]
    Malformed(String),

    #[error("encryption failed")]
    Encryption,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A 256-bit asset key.
#[derive(Clone, PartialEq, Eq)]
pub struct AssetKey([u8; 32]);

impl AssetKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse the vault's textual form (URL-safe base64, padded or not).
    pub fn parse(encoded: &str) -> Result<Self, CryptoError> {
        let trimmed = encoded.trim().trim_end_matches('=');
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AssetKey(..)")
    }
}

/// Generate a fresh random asset key in its textual (vault) form.
pub fn generate_key() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    AssetKey::from_bytes(bytes).encode()
}

/// Encrypt `plaintext` under `key`.
///
/// Returns `version || nonce || ciphertext` (ciphertext carries the 16-byte GCM tag).
pub fn encrypt(plaintext: &[u8], key: &AssetKey) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = key
        .cipher()
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut bundle = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    bundle.push(BUNDLE_VERSION);
    bundle.extend_from_slice(&nonce_bytes);
    bundle.extend_from_slice(&ciphertext);
    Ok(bundle)
}

/// Decrypt a bundle produced by [`encrypt`]. Fails closed on any integrity mismatch.
pub fn decrypt(bundle: &[u8], key: &AssetKey) -> Result<Vec<u8>, CryptoError> {
    if bundle.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::Malformed(format!(
            "bundle too short ({} bytes)",
            bundle.len()
        )));
    }
    if bundle[0] != BUNDLE_VERSION {
        return Err(CryptoError::Malformed(format!(
            "unsupported bundle version 0x{:02x}",
            bundle[0]
        )));
    }
    let nonce = Nonce::from_slice(&bundle[1..HEADER_LEN]);
    key.cipher()
        .decrypt(nonce, &bundle[HEADER_LEN..])
        .map_err(|_| CryptoError::Authentication)
}

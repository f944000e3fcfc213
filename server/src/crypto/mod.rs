//! Symmetric authenticated encryption for marketplace assets.
//!
//! Assets are sealed with AES-256-GCM under a per-asset key held by the
//! catalog/key vault. `engine` works on byte payloads, `file` wraps it for
//! operational tooling that works on `.enc` files.

pub mod engine;
pub mod file;

pub use engine::{decrypt, encrypt, generate_key, AssetKey, CryptoError};
pub use file::{decrypt_file, encrypt_file, ENCRYPTED_SUFFIX};

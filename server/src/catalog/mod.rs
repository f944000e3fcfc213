//! Catalog / key-vault view used by the delivery pipeline.
//!
//! The vault is owned externally; the core only reads from it through the
//! [`KeyVault`] trait. Two implementations ship here: an in-memory vault
//! (tests, embedding) and a JSON-file vault for single-node deployments.

pub mod resolver;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::content::ContentId;

pub use resolver::{AssetResolver, ResolveError};
pub use store::{spawn_catalog_reload, JsonFileVault, MemoryVault};

/// How a purchased asset reaches the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    /// Buyer receives the decrypted asset.
    #[serde(alias = "standard", alias = "0")]
    Standard,
    /// Only the result of a computation over the asset leaves the server.
    #[serde(alias = "compute_privacy", alias = "compute", alias = "1")]
    ComputePrivacy,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Standard => f.write_str("STANDARD"),
            DeliveryMode::ComputePrivacy => f.write_str("COMPUTE_PRIVACY"),
        }
    }
}

/// Catalog metadata and decryption key for one asset.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub content_id: ContentId,
    pub display_name: String,
    pub delivery_mode: DeliveryMode,
    /// URL-safe base64 AES-256 key
    pub decryption_key: String,
    /// Algorithm run for purchases of compute-only assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm_id: Option<String>,
}

impl std::fmt::Debug for AssetRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRecord")
            .field("content_id", &self.content_id)
            .field("display_name", &self.display_name)
            .field("delivery_mode", &self.delivery_mode)
            .field("decryption_key", &"<redacted>")
            .field("algorithm_id", &self.algorithm_id)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vault data is malformed: {0}")]
    Parse(String),

    #[error("vault unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the external catalog / key vault.
///
/// Implementations must be safe for concurrent reads. There is at most one
/// record per content identifier.
pub trait KeyVault: Send + Sync {
    fn lookup(&self, content_id: &ContentId) -> Result<Option<AssetRecord>, VaultError>;

    /// Number of records, if the backend can tell cheaply.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

use std::sync::Arc;

use crate::catalog::{AssetRecord, KeyVault, VaultError};
use crate::content::ContentId;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown asset {0}")]
    NotFound(ContentId),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Maps a content identifier to its catalog record. Never touches the network.
#[derive(Clone)]
pub struct AssetResolver {
    vault: Arc<dyn KeyVault>,
}

impl AssetResolver {
    pub fn new(vault: Arc<dyn KeyVault>) -> Self {
        Self { vault }
    }

    pub fn resolve(&self, content_id: &ContentId) -> Result<AssetRecord, ResolveError> {
        match self.vault.lookup(content_id)? {
            Some(record) => {
                tracing::debug!(
                    content_id = %content_id,
                    mode = %record.delivery_mode,
                    "Resolved asset {:?}",
                    record.display_name
                );
                Ok(record)
            }
            None => Err(ResolveError::NotFound(content_id.clone())),
        }
    }

    pub fn vault(&self) -> &Arc<dyn KeyVault> {
        &self.vault
    }
}

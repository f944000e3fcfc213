//! Compute-to-data executor.
//!
//! A registry of opaque algorithms `bytes -> text`. In privacy-preserving
//! delivery the executor is the only component that ever sees decrypted asset
//! bytes: [`ComputeExecutor::run_sealed`] decrypts inside the boundary and only
//! the algorithm's textual result leaves it.

pub mod algorithms;
pub mod routes;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::crypto::{self, AssetKey, CryptoError};

/// An algorithm over raw asset bytes. `Err` carries a human-readable reason.
pub type Algorithm = Arc<dyn Fn(&[u8]) -> Result<String, String> + Send + Sync>;

/// Result of running a registered algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeOutcome {
    Completed(String),
    /// The algorithm failed or panicked; carries a descriptive message.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("unsupported algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("asset could not be unsealed: {0}")]
    Unseal(#[from] CryptoError),
}

#[derive(Default)]
pub struct ComputeExecutor {
    registry: HashMap<String, Algorithm>,
}

impl ComputeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor preloaded with the built-in algorithms.
    pub fn with_builtins() -> Self {
        let mut executor = Self::new();
        algorithms::register_builtins(&mut executor);
        executor
    }

    pub fn register<F>(&mut self, id: impl Into<String>, algorithm: F)
    where
        F: Fn(&[u8]) -> Result<String, String> + Send + Sync + 'static,
    {
        self.registry.insert(id.into(), Arc::new(algorithm));
    }

    pub fn supports(&self, id: &str) -> bool {
        self.registry.contains_key(id)
    }

    /// Registered algorithm ids, sorted.
    pub fn algorithms(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `id` over plaintext bytes.
    pub fn run(&self, id: &str, bytes: &[u8]) -> Result<ComputeOutcome, ComputeError> {
        let algorithm = self
            .registry
            .get(id)
            .ok_or_else(|| ComputeError::UnsupportedAlgorithm(id.to_string()))?;

        let outcome = match catch_unwind(AssertUnwindSafe(|| algorithm(bytes))) {
            Ok(Ok(text)) => ComputeOutcome::Completed(text),
            Ok(Err(reason)) => ComputeOutcome::Failed(format!("algorithm {} failed: {}", id, reason)),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(algorithm = %id, "Algorithm panicked: {}", reason);
                ComputeOutcome::Failed(format!("algorithm {} crashed: {}", id, reason))
            }
        };
        Ok(outcome)
    }

    /// Decrypt `bundle` and run `id` over the plaintext without it leaving the executor.
    pub fn run_sealed(
        &self,
        id: &str,
        bundle: &[u8],
        key: &AssetKey,
    ) -> Result<ComputeOutcome, ComputeError> {
        if !self.supports(id) {
            return Err(ComputeError::UnsupportedAlgorithm(id.to_string()));
        }
        let plaintext = crypto::decrypt(bundle, key)?;
        self.run(id, &plaintext)
    }
}

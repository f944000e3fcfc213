//! Ledger side of the pipeline: the query interface the backend consumes,
//! decoding of raw purchase logs, and the polling watcher.

pub mod decode;
pub mod rpc;
pub mod watcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use decode::{decode_log, event_topic, DecodeError};
pub use rpc::{JsonRpcLedger, LedgerDiagnostics};
pub use watcher::{LedgerWatcher, PurchaseHandler, WatcherSettings, WatcherState, WatcherStatus};

/// Default purchase event signature emitted by the marketplace contract.
pub const DEFAULT_EVENT_SIGNATURE: &str = "FilePurchased(address,string)";

/// A log entry as returned by `eth_getLogs`. Quantities stay hex-encoded until decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// A decoded purchase. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseEvent {
    pub transaction_id: String,
    pub buyer_address: String,
    pub block_number: u64,
    pub log_index: u64,
    #[serde(with = "hex_bytes")]
    pub raw_log_data: Vec<u8>,
}

/// Which logs the watcher asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub contract_address: String,
    /// keccak256 of the event signature, `0x`-prefixed
    pub topic: String,
}

impl LogFilter {
    pub fn for_signature(contract_address: impl Into<String>, signature: &str) -> Self {
        Self {
            contract_address: contract_address.into(),
            topic: event_topic(signature),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unreachable: {0}")]
    Connection(String),

    #[error("ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected ledger response: {0}")]
    InvalidResponse(String),
}

/// Query interface of the external ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn is_connected(&self) -> bool;

    async fn current_block_height(&self) -> Result<u64, LedgerError>;

    /// Logs matching `filter` in `[from_block, to_block]`, inclusive.
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, LedgerError>;
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }
}

//! Delivery of purchased assets.
//!
//! Every request ends in exactly one [`DeliveryResult`]. Failures are typed
//! statuses, never panics, and a compute delivery never carries asset bytes.

pub mod dispatcher;
pub mod outbox;

use serde::Serialize;

pub use dispatcher::{Dispatcher, PurchasePipeline};
pub use outbox::DeliveryOutbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Delivered,
    UnknownAsset,
    NetworkError,
    AuthError,
    UnsupportedAlgorithm,
    /// A registered algorithm ran and failed.
    ComputeFailed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::UnknownAsset => "UNKNOWN_ASSET",
            DeliveryStatus::NetworkError => "NETWORK_ERROR",
            DeliveryStatus::AuthError => "AUTH_ERROR",
            DeliveryStatus::UnsupportedAlgorithm => "UNSUPPORTED_ALGORITHM",
            DeliveryStatus::ComputeFailed => "COMPUTE_FAILED",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful delivery hands over.
#[derive(Clone, PartialEq, Eq)]
pub enum DeliveryPayload {
    /// Decrypted asset bytes. Standard delivery only.
    Asset(Vec<u8>),
    /// Textual algorithm output. The only thing compute delivery returns.
    Computed(String),
}

impl std::fmt::Debug for DeliveryPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryPayload::Asset(bytes) => write!(f, "Asset({} bytes)", bytes.len()),
            DeliveryPayload::Computed(text) => f.debug_tuple("Computed").field(text).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub status: DeliveryStatus,
    pub message: String,
    pub payload: Option<DeliveryPayload>,
}

impl DeliveryResult {
    pub fn delivered(message: impl Into<String>, payload: DeliveryPayload) -> Self {
        Self {
            status: DeliveryStatus::Delivered,
            message: message.into(),
            payload: Some(payload),
        }
    }

    pub fn failed(status: DeliveryStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            payload: None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }

    /// Text of a computed result, if this delivery produced one.
    pub fn computed(&self) -> Option<&str> {
        match &self.payload {
            Some(DeliveryPayload::Computed(text)) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&DeliveryStatus::UnsupportedAlgorithm).unwrap();
        assert_eq!(json, "\"UNSUPPORTED_ALGORITHM\"");
        assert_eq!(DeliveryStatus::ComputeFailed.to_string(), "COMPUTE_FAILED");
    }

    #[test]
    fn test_asset_payload_debug_hides_bytes() {
        let payload = DeliveryPayload::Asset(b"secret rows".to_vec());
        assert_eq!(format!("{:?}", payload), "Asset(11 bytes)");
    }
}

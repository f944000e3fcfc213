//! Decoding of raw purchase logs.

use sha3::{Digest, Keccak256};

use crate::ledger::{PurchaseEvent, RawLog};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("log is missing {0}")]
    MissingField(&'static str),

    #[error("invalid hex in {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("first indexed topic does not hold an address: {0:?}")]
    InvalidBuyerTopic(String),

    #[error("log was removed by a chain reorganisation")]
    Removed,
}

/// Topic hash of an event signature: `0x` + hex(keccak256(signature)).
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(field: &'static str, value: &str) -> Result<u64, DecodeError> {
    let digits = strip_0x(value);
    if digits.is_empty() {
        return Err(DecodeError::InvalidHex {
            field,
            reason: "empty quantity".to_string(),
        });
    }
    u64::from_str_radix(digits, 16).map_err(|e| DecodeError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// Decode a raw log into a purchase event.
///
/// The buyer is the last 40 hex characters of the first indexed topic.
pub fn decode_log(log: &RawLog) -> Result<PurchaseEvent, DecodeError> {
    if log.removed {
        return Err(DecodeError::Removed);
    }

    let block_number = parse_quantity(
        "blockNumber",
        log.block_number
            .as_deref()
            .ok_or(DecodeError::MissingField("blockNumber"))?,
    )?;
    let log_index = match log.log_index.as_deref() {
        Some(idx) => parse_quantity("logIndex", idx)?,
        None => 0,
    };
    let transaction_id = log
        .transaction_hash
        .clone()
        .filter(|h| !h.is_empty())
        .ok_or(DecodeError::MissingField("transactionHash"))?;

    let buyer_topic = log
        .topics
        .get(1)
        .ok_or(DecodeError::MissingField("buyer topic"))?;
    let buyer_address = buyer_from_topic(buyer_topic)?;

    let raw_log_data = hex::decode(strip_0x(&log.data)).map_err(|e| DecodeError::InvalidHex {
        field: "data",
        reason: e.to_string(),
    })?;

    Ok(PurchaseEvent {
        transaction_id,
        buyer_address,
        block_number,
        log_index,
        raw_log_data,
    })
}

fn buyer_from_topic(topic: &str) -> Result<String, DecodeError> {
    let digits = strip_0x(topic);
    if digits.len() < 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidBuyerTopic(topic.to_string()));
    }
    Ok(format!("0x{}", digits[digits.len() - 40..].to_ascii_lowercase()))
}

fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

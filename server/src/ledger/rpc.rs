//! Ethereum JSON-RPC implementation of the ledger query interface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ledger::decode::parse_quantity;
use crate::ledger::{LedgerClient, LedgerError, LogFilter, RawLog};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Result of [`JsonRpcLedger::diagnose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerDiagnostics {
    pub connected: bool,
    pub block_height: Option<u64>,
    pub contract_has_code: Option<bool>,
    pub matching_logs: Option<usize>,
    /// Every log the contract emitted, whatever its topic.
    pub contract_logs: Option<usize>,
    /// `topics[0]` of the first contract log. Differs from the filter topic
    /// when the watched event signature is wrong.
    pub sample_topic: Option<String>,
}

pub struct JsonRpcLedger {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    /// Every RPC call is bounded by `request_timeout`.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Connection(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LedgerError::Connection(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(err) = envelope.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = envelope
            .result
            .ok_or_else(|| LedgerError::InvalidResponse(format!("{}: missing result", method)))?;
        serde_json::from_value(result)
            .map_err(|e| LedgerError::InvalidResponse(format!("{}: {}", method, e)))
    }

    /// Whether the contract address holds deployed code.
    pub async fn contract_has_code(&self, address: &str) -> Result<bool, LedgerError> {
        let code: String = self.call("eth_getCode", json!([address, "latest"])).await?;
        let digits = code.trim_start_matches("0x");
        Ok(!digits.is_empty() && digits.bytes().any(|b| b != b'0'))
    }

    /// Step-by-step health report of the ledger connection and contract.
    pub async fn diagnose(&self, filter: &LogFilter) -> LedgerDiagnostics {
        let mut report = LedgerDiagnostics {
            connected: self.is_connected().await,
            block_height: None,
            contract_has_code: None,
            matching_logs: None,
            contract_logs: None,
            sample_topic: None,
        };
        if !report.connected {
            return report;
        }
        report.block_height = self.current_block_height().await.ok();
        report.contract_has_code = self.contract_has_code(&filter.contract_address).await.ok();
        let Some(height) = report.block_height else {
            return report;
        };
        report.matching_logs = self.get_logs(0, height, filter).await.ok().map(|l| l.len());
        if let Ok(logs) = self.contract_logs(0, height, &filter.contract_address).await {
            report.contract_logs = Some(logs.len());
            report.sample_topic = logs.into_iter().next().and_then(|l| l.topics.into_iter().next());
        }
        report
    }

    /// All logs emitted by `address` in the range, with no topic filter.
    pub async fn contract_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: &str,
    ) -> Result<Vec<RawLog>, LedgerError> {
        self.call(
            "eth_getLogs",
            json!([{
                "fromBlock": quantity(from_block),
                "toBlock": quantity(to_block),
                "address": address,
            }]),
        )
        .await
    }
}

fn quantity(n: u64) -> String {
    format!("0x{:x}", n)
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn is_connected(&self) -> bool {
        match self.call::<String>("eth_chainId", json!([])).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Ledger connectivity check failed: {}", e);
                false
            }
        }
    }

    async fn current_block_height(&self) -> Result<u64, LedgerError> {
        let height: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity("blockNumber", &height)
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, LedgerError> {
        self.call(
            "eth_getLogs",
            json!([{
                "fromBlock": quantity(from_block),
                "toBlock": quantity(to_block),
                "address": filter.contract_address,
                "topics": [filter.topic],
            }]),
        )
        .await
    }
}

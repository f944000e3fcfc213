//! Per-request delivery state machine.
//!
//! `RESOLVE -> RETRIEVE -> (DECRYPT | COMPUTE) -> DELIVERED | FAILED`

use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{AssetRecord, AssetResolver, DeliveryMode, ResolveError};
use crate::compute::{ComputeError, ComputeExecutor, ComputeOutcome};
use crate::content::{extract_content_id, ContentId, ContentRetriever};
use crate::crypto::{self, AssetKey, CryptoError};
use crate::delivery::{DeliveryOutbox, DeliveryPayload, DeliveryResult, DeliveryStatus};
use crate::ledger::{PurchaseEvent, PurchaseHandler};

pub struct Dispatcher {
    resolver: AssetResolver,
    retriever: ContentRetriever,
    executor: Arc<ComputeExecutor>,
    default_algorithm: String,
}

impl Dispatcher {
    pub fn new(
        resolver: AssetResolver,
        retriever: ContentRetriever,
        executor: Arc<ComputeExecutor>,
        default_algorithm: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            retriever,
            executor,
            default_algorithm: default_algorithm.into(),
        }
    }

    pub fn executor(&self) -> &Arc<ComputeExecutor> {
        &self.executor
    }

    pub fn retriever(&self) -> &ContentRetriever {
        &self.retriever
    }

    pub fn default_algorithm(&self) -> &str {
        &self.default_algorithm
    }

    /// Purchase path: deliver according to the asset's delivery mode.
    pub async fn deliver(&self, cid: &ContentId) -> DeliveryResult {
        let record = match self.resolve(cid) {
            Ok(record) => record,
            Err(result) => return result,
        };

        match record.delivery_mode {
            DeliveryMode::Standard => self.deliver_plain(&record).await,
            DeliveryMode::ComputePrivacy => {
                let algorithm = record
                    .algorithm_id
                    .clone()
                    .unwrap_or_else(|| self.default_algorithm.clone());
                self.deliver_computed(&record, &algorithm).await
            }
        }
    }

    /// Ad-hoc compute path. Always computes, whatever the asset's mode.
    pub async fn compute(&self, cid: &ContentId, algorithm: &str) -> DeliveryResult {
        match self.resolve(cid) {
            Ok(record) => self.deliver_computed(&record, algorithm).await,
            Err(result) => result,
        }
    }

    fn resolve(&self, cid: &ContentId) -> Result<AssetRecord, DeliveryResult> {
        match self.resolver.resolve(cid) {
            Ok(record) => Ok(record),
            Err(ResolveError::NotFound(_)) => {
                tracing::warn!(content_id = %cid, "Asset not found in vault");
                Err(DeliveryResult::failed(
                    DeliveryStatus::UnknownAsset,
                    format!("asset {} is not in the catalog", cid),
                ))
            }
            Err(e @ ResolveError::Vault(_)) => {
                tracing::error!(content_id = %cid, "Vault lookup failed: {}", e);
                Err(DeliveryResult::failed(DeliveryStatus::UnknownAsset, e.to_string()))
            }
        }
    }

    async fn retrieve(&self, cid: &ContentId) -> Result<Vec<u8>, DeliveryResult> {
        self.retriever.fetch(cid).await.map_err(|e| {
            tracing::error!(content_id = %cid, "Retrieval failed: {}", e);
            DeliveryResult::failed(DeliveryStatus::NetworkError, e.to_string())
        })
    }

    async fn deliver_plain(&self, record: &AssetRecord) -> DeliveryResult {
        let cid = &record.content_id;
        let bundle = match self.retrieve(cid).await {
            Ok(bundle) => bundle,
            Err(result) => return result,
        };

        let plaintext = AssetKey::parse(&record.decryption_key)
            .and_then(|key| crypto::decrypt(&bundle, &key));
        match plaintext {
            Ok(bytes) => {
                tracing::info!(
                    content_id = %cid,
                    bytes = bytes.len(),
                    "Delivered {}",
                    record.display_name
                );
                DeliveryResult::delivered(
                    format!("{} ({} bytes)", record.display_name, bytes.len()),
                    DeliveryPayload::Asset(bytes),
                )
            }
            Err(e) => auth_failure(cid, e),
        }
    }

    async fn deliver_computed(&self, record: &AssetRecord, algorithm: &str) -> DeliveryResult {
        let cid = &record.content_id;
        if !self.executor.supports(algorithm) {
            tracing::warn!(content_id = %cid, algorithm, "Unsupported algorithm requested");
            return DeliveryResult::failed(
                DeliveryStatus::UnsupportedAlgorithm,
                format!("algorithm {:?} is not supported", algorithm),
            );
        }

        let bundle = match self.retrieve(cid).await {
            Ok(bundle) => bundle,
            Err(result) => return result,
        };
        let key = match AssetKey::parse(&record.decryption_key) {
            Ok(key) => key,
            Err(e) => return auth_failure(cid, e),
        };

        let executor = self.executor.clone();
        let id = algorithm.to_string();
        let joined =
            tokio::task::spawn_blocking(move || executor.run_sealed(&id, &bundle, &key)).await;

        match joined {
            Ok(Ok(ComputeOutcome::Completed(text))) => {
                tracing::info!(content_id = %cid, algorithm, "Computation delivered");
                DeliveryResult::delivered(text.clone(), DeliveryPayload::Computed(text))
            }
            Ok(Ok(ComputeOutcome::Failed(message))) => {
                tracing::warn!(content_id = %cid, algorithm, "{}", message);
                DeliveryResult::failed(DeliveryStatus::ComputeFailed, message)
            }
            Ok(Err(ComputeError::UnsupportedAlgorithm(id))) => DeliveryResult::failed(
                DeliveryStatus::UnsupportedAlgorithm,
                format!("algorithm {:?} is not supported", id),
            ),
            Ok(Err(ComputeError::Unseal(e))) => auth_failure(cid, e),
            Err(e) => {
                tracing::error!(content_id = %cid, algorithm, "Compute task aborted: {}", e);
                DeliveryResult::failed(
                    DeliveryStatus::ComputeFailed,
                    format!("algorithm {} aborted", algorithm),
                )
            }
        }
    }
}

fn auth_failure(cid: &ContentId, error: CryptoError) -> DeliveryResult {
    tracing::error!(content_id = %cid, "Decryption failed: {}", error);
    DeliveryResult::failed(DeliveryStatus::AuthError, error.to_string())
}

/// Purchase handler fed by the ledger watcher.
pub struct PurchasePipeline {
    dispatcher: Arc<Dispatcher>,
    outbox: Option<DeliveryOutbox>,
}

impl PurchasePipeline {
    pub fn new(dispatcher: Arc<Dispatcher>, outbox: Option<DeliveryOutbox>) -> Self {
        Self { dispatcher, outbox }
    }

    /// Returns `None` when the event names no asset.
    pub async fn process(&self, event: &PurchaseEvent) -> Option<DeliveryResult> {
        let Some(cid) = extract_content_id(&event.raw_log_data) else {
            tracing::warn!(tx = %event.transaction_id, "No content identifier in purchase log");
            return None;
        };
        tracing::info!(
            tx = %event.transaction_id,
            buyer = %event.buyer_address,
            content_id = %cid,
            "Processing purchase"
        );

        let result = self.dispatcher.deliver(&cid).await;
        if !result.is_delivered() {
            tracing::warn!(
                tx = %event.transaction_id,
                content_id = %cid,
                status = %result.status,
                "Purchase not delivered: {}",
                result.message
            );
            return Some(result);
        }

        if let (Some(outbox), Some(payload)) = (&self.outbox, &result.payload) {
            let outbox = outbox.clone();
            let payload = payload.clone();
            let target = cid.clone();
            match tokio::task::spawn_blocking(move || outbox.write(&target, &payload)).await {
                Ok(Ok(path)) => {
                    tracing::info!(content_id = %cid, "File ready at {}", path.display())
                }
                Ok(Err(e)) => tracing::error!(content_id = %cid, "Failed to write delivery: {}", e),
                Err(e) => tracing::error!(content_id = %cid, "Delivery write task failed: {}", e),
            }
        }
        Some(result)
    }
}

#[async_trait]
impl PurchaseHandler for PurchasePipeline {
    async fn handle(&self, event: PurchaseEvent) {
        self.process(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryVault;
    use crate::content::{GatewayClient, GatewayEndpoint, GatewayError, GatewayResponse};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CSV: &[u8] = b"Date,Price,Volume\n2024-01-01,100,10\n2024-01-02,105,12\n";

    #[derive(Default)]
    struct CountingGateway {
        content: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GatewayClient for CountingGateway {
        async fn get(
            &self,
            _endpoint: &GatewayEndpoint,
            cid: &ContentId,
        ) -> Result<GatewayResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match self.content.get(cid.as_str()) {
                Some(body) => GatewayResponse {
                    body: body.clone(),
                    found: true,
                },
                None => GatewayResponse {
                    body: Vec::new(),
                    found: false,
                },
            })
        }
    }

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        gateway: Arc<CountingGateway>,
        standard: ContentId,
        private: ContentId,
        plaintext: Vec<u8>,
        key: String,
    }

    fn cid(fill: char) -> ContentId {
        ContentId::parse(&format!("Qm{}", fill.to_string().repeat(44))).unwrap()
    }

    fn fixture() -> Fixture {
        let key_text = crypto::generate_key();
        let key = AssetKey::parse(&key_text).unwrap();
        let bundle = crypto::encrypt(CSV, &key).unwrap();
        let standard = cid('S');
        let private = cid('P');

        let vault = MemoryVault::with_records([
            AssetRecord {
                content_id: standard.clone(),
                display_name: "prices.csv".into(),
                delivery_mode: DeliveryMode::Standard,
                decryption_key: key_text.clone(),
                algorithm_id: None,
            },
            AssetRecord {
                content_id: private.clone(),
                display_name: "private.csv".into(),
                delivery_mode: DeliveryMode::ComputePrivacy,
                decryption_key: key_text.clone(),
                algorithm_id: Some("row_count".into()),
            },
        ]);

        let mut content = HashMap::new();
        content.insert(standard.to_string(), bundle.clone());
        content.insert(private.to_string(), bundle);
        let gateway = Arc::new(CountingGateway {
            content,
            calls: AtomicUsize::new(0),
        });

        let retriever = ContentRetriever::new(
            vec![GatewayEndpoint::new("http://gw.test/ipfs", 0)],
            gateway.clone(),
            Duration::from_secs(1),
        );
        let dispatcher = Dispatcher::new(
            AssetResolver::new(Arc::new(vault)),
            retriever,
            Arc::new(ComputeExecutor::with_builtins()),
            "dataset_summary",
        );
        Fixture {
            dispatcher: Arc::new(dispatcher),
            gateway,
            standard,
            private,
            plaintext: CSV.to_vec(),
            key: key_text,
        }
    }

    #[tokio::test]
    async fn test_unknown_asset_never_touches_gateways() {
        let f = fixture();
        let unknown = cid('U');
        for _ in 0..2 {
            let result = f.dispatcher.deliver(&unknown).await;
            assert_eq!(result.status, DeliveryStatus::UnknownAsset);
            assert!(result.payload.is_none());
        }
        let result = f.dispatcher.compute(&unknown, "row_count").await;
        assert_eq!(result.status, DeliveryStatus::UnknownAsset);
        assert_eq!(f.gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_standard_delivery_returns_plaintext() {
        let f = fixture();
        let result = f.dispatcher.deliver(&f.standard).await;
        assert_eq!(result.status, DeliveryStatus::Delivered);
        assert_eq!(result.payload, Some(DeliveryPayload::Asset(f.plaintext.clone())));
    }

    #[tokio::test]
    async fn test_compute_privacy_purchase_returns_only_result() {
        let f = fixture();
        let result = f.dispatcher.deliver(&f.private).await;
        assert_eq!(result.status, DeliveryStatus::Delivered);
        assert_eq!(result.computed(), Some("2"));
        assert!(!result.message.contains("2024-01-01"));
    }

    #[tokio::test]
    async fn test_compute_on_standard_asset_still_computes() {
        let f = fixture();
        let result = f.dispatcher.compute(&f.standard, "dataset_summary").await;
        assert_eq!(result.status, DeliveryStatus::Delivered);
        let text = result.computed().unwrap();
        assert!(text.contains("2 rows"));
        assert!(!text.contains("2024-01-01"));
        assert!(!matches!(result.payload, Some(DeliveryPayload::Asset(_))));
    }

    #[tokio::test]
    async fn test_unsupported_algorithm_skips_retrieval() {
        let f = fixture();
        let result = f.dispatcher.compute(&f.private, "train_model").await;
        assert_eq!(result.status, DeliveryStatus::UnsupportedAlgorithm);
        assert_eq!(f.gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_content_is_network_error() {
        let f = fixture();
        let vault = MemoryVault::with_records([AssetRecord {
            content_id: cid('M'),
            display_name: "missing".into(),
            delivery_mode: DeliveryMode::Standard,
            decryption_key: crypto::generate_key(),
            algorithm_id: None,
        }]);
        let dispatcher = Dispatcher::new(
            AssetResolver::new(Arc::new(vault)),
            ContentRetriever::new(
                vec![GatewayEndpoint::new("http://gw.test/ipfs", 0)],
                f.gateway.clone(),
                Duration::from_secs(1),
            ),
            Arc::new(ComputeExecutor::with_builtins()),
            "dataset_summary",
        );
        let result = dispatcher.deliver(&cid('M')).await;
        assert_eq!(result.status, DeliveryStatus::NetworkError);
    }

    #[tokio::test]
    async fn test_wrong_key_is_auth_error() {
        let f = fixture();
        let vault = MemoryVault::with_records([AssetRecord {
            content_id: f.standard.clone(),
            display_name: "prices.csv".into(),
            delivery_mode: DeliveryMode::Standard,
            decryption_key: crypto::generate_key(),
            algorithm_id: None,
        }]);
        let dispatcher = Dispatcher::new(
            AssetResolver::new(Arc::new(vault)),
            ContentRetriever::new(
                vec![GatewayEndpoint::new("http://gw.test/ipfs", 0)],
                f.gateway.clone(),
                Duration::from_secs(1),
            ),
            Arc::new(ComputeExecutor::with_builtins()),
            "dataset_summary",
        );
        assert_eq!(dispatcher.deliver(&f.standard).await.status, DeliveryStatus::AuthError);
        assert_eq!(
            dispatcher.compute(&f.standard, "row_count").await.status,
            DeliveryStatus::AuthError
        );
    }

    #[tokio::test]
    async fn test_failing_algorithm_is_compute_failed() {
        let f = fixture();
        let mut executor = ComputeExecutor::with_builtins();
        executor.register("explode", |_| panic!("boom"));
        let dispatcher = Dispatcher::new(
            AssetResolver::new(Arc::new(MemoryVault::with_records([AssetRecord {
                content_id: f.private.clone(),
                display_name: "private.csv".into(),
                delivery_mode: DeliveryMode::ComputePrivacy,
                decryption_key: f.key.clone(),
                algorithm_id: None,
            }]))),
            ContentRetriever::new(
                vec![GatewayEndpoint::new("http://gw.test/ipfs", 0)],
                f.gateway.clone(),
                Duration::from_secs(1),
            ),
            Arc::new(executor),
            "explode",
        );

        let result = dispatcher.deliver(&f.private).await;
        assert_eq!(result.status, DeliveryStatus::ComputeFailed);
        assert!(result.message.contains("explode"));
        assert!(result.payload.is_none());

        // Executor still serves other algorithms afterwards
        let result = dispatcher.compute(&f.private, "row_count").await;
        assert_eq!(result.computed(), Some("2"));
    }

    #[tokio::test]
    async fn test_pipeline_writes_outbox() {
        let f = fixture();
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = PurchasePipeline::new(f.dispatcher.clone(), Some(DeliveryOutbox::new(tmp.path())));
        let event = PurchaseEvent {
            transaction_id: "0xabc".into(),
            buyer_address: "0xb0b".into(),
            block_number: 1,
            log_index: 0,
            raw_log_data: format!("\0\0 {} \0", f.standard).into_bytes(),
        };

        let result = pipeline.process(&event).await.unwrap();
        assert!(result.is_delivered());
        let written = std::fs::read(tmp.path().join("downloads").join(f.standard.as_str())).unwrap();
        assert_eq!(written, f.plaintext);
    }

    #[tokio::test]
    async fn test_pipeline_drops_event_without_identifier() {
        let f = fixture();
        let pipeline = PurchasePipeline::new(f.dispatcher.clone(), None);
        let event = PurchaseEvent {
            transaction_id: "0xdef".into(),
            buyer_address: "0xb0b".into(),
            block_number: 1,
            log_index: 0,
            raw_log_data: vec![0xff, 0x00, 0x13],
        };
        assert!(pipeline.process(&event).await.is_none());
        assert_eq!(f.gateway.calls.load(Ordering::SeqCst), 0);
    }
}

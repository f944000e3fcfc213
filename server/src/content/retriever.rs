//! Ordered multi-gateway retrieval with per-attempt timeout and failover.

use std::sync::Arc;
use std::time::Duration;

use crate::content::cid::ContentId;
use crate::content::gateway::{GatewayClient, GatewayEndpoint};

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("no gateways configured")]
    NoGateways,

    #[error("all {attempts} gateways failed for {content_id}: {last_error}")]
    Exhausted {
        content_id: ContentId,
        attempts: usize,
        last_error: String,
    },
}

/// Fetches asset bytes through a static, priority-ordered gateway list.
///
/// Worst-case latency of [`ContentRetriever::fetch`] is
/// `gateways.len() * per_attempt_timeout`.
pub struct ContentRetriever {
    endpoints: Vec<GatewayEndpoint>,
    client: Arc<dyn GatewayClient>,
    per_attempt_timeout: Duration,
}

impl ContentRetriever {
    pub fn new(
        mut endpoints: Vec<GatewayEndpoint>,
        client: Arc<dyn GatewayClient>,
        per_attempt_timeout: Duration,
    ) -> Self {
        // Stable: equal priorities keep their configured order
        endpoints.sort_by_key(|e| e.priority);
        Self {
            endpoints,
            client,
            per_attempt_timeout,
        }
    }

    pub fn endpoints(&self) -> &[GatewayEndpoint] {
        &self.endpoints
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }

    /// Upper bound on how long a single `fetch` can take.
    pub fn worst_case_latency(&self) -> Duration {
        self.per_attempt_timeout * self.endpoints.len() as u32
    }

    /// Return the bytes from the first gateway that has the content.
    pub async fn fetch(&self, cid: &ContentId) -> Result<Vec<u8>, RetrievalError> {
        if self.endpoints.is_empty() {
            return Err(RetrievalError::NoGateways);
        }

        let mut last_error = String::new();
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            tracing::debug!(
                content_id = %cid,
                gateway = %endpoint.base_url,
                "Trying gateway {}/{}",
                idx + 1,
                self.endpoints.len()
            );

            let attempt = tokio::time::timeout(
                self.per_attempt_timeout,
                self.client.get(endpoint, cid),
            )
            .await;

            match attempt {
                Ok(Ok(response)) if response.found && !response.body.is_empty() => {
                    tracing::info!(
                        content_id = %cid,
                        gateway = %endpoint.base_url,
                        bytes = response.body.len(),
                        "Retrieved content"
                    );
                    return Ok(response.body);
                }
                Ok(Ok(response)) => {
                    last_error = if response.found {
                        format!("{} returned an empty body", endpoint.base_url)
                    } else {
                        format!("{} does not have the content", endpoint.base_url)
                    };
                }
                Ok(Err(e)) => {
                    last_error = format!("{}: {}", endpoint.base_url, e);
                }
                Err(_) => {
                    last_error = format!(
                        "{} timed out after {}ms",
                        endpoint.base_url,
                        self.per_attempt_timeout.as_millis()
                    );
                }
            }
            tracing::warn!(content_id = %cid, "Gateway attempt failed: {}", last_error);
        }

        tracing::error!(content_id = %cid, "All gateways failed");
        Err(RetrievalError::Exhausted {
            content_id: cid.clone(),
            attempts: self.endpoints.len(),
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::gateway::{GatewayError, GatewayResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Instant;

    const CID: &str = "QmSeygQMq7tGcrGXer2qtWZgjRrkT3FYDk9hsLDobZdWTT";

    enum Behavior {
        Fail,
        NotFound,
        Empty,
        Hang,
        Serve(&'static [u8]),
    }

    /// Scripted gateway keyed by base URL that records every call.
    struct ScriptedGateways {
        script: Vec<(&'static str, Behavior)>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedGateways {
        fn new(script: Vec<(&'static str, Behavior)>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GatewayClient for ScriptedGateways {
        async fn get(
            &self,
            endpoint: &GatewayEndpoint,
            _cid: &ContentId,
        ) -> Result<GatewayResponse, GatewayError> {
            self.calls.lock().unwrap().push(endpoint.base_url.clone());
            let behavior = self
                .script
                .iter()
                .find(|(url, _)| *url == endpoint.base_url)
                .map(|(_, b)| b)
                .unwrap();
            match behavior {
                Behavior::Fail => Err(GatewayError::Connection("refused".into())),
                Behavior::NotFound => Ok(GatewayResponse { body: Vec::new(), found: false }),
                Behavior::Empty => Ok(GatewayResponse { body: Vec::new(), found: true }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
                Behavior::Serve(bytes) => Ok(GatewayResponse {
                    body: bytes.to_vec(),
                    found: true,
                }),
            }
        }
    }

    fn endpoints(urls: &[&str]) -> Vec<GatewayEndpoint> {
        urls.iter()
            .enumerate()
            .map(|(i, u)| GatewayEndpoint::new(*u, i as u32))
            .collect()
    }

    #[tokio::test]
    async fn test_failover_stops_at_first_success() {
        let gw = ScriptedGateways::new(vec![
            ("g1", Behavior::Fail),
            ("g2", Behavior::Serve(b"ciphertext")),
            ("g3", Behavior::Serve(b"other")),
        ]);
        let retriever = ContentRetriever::new(
            endpoints(&["g1", "g2", "g3"]),
            gw.clone(),
            Duration::from_millis(200),
        );

        let bytes = retriever.fetch(&ContentId::parse(CID).unwrap()).await.unwrap();
        assert_eq!(bytes, b"ciphertext");
        assert_eq!(gw.calls(), vec!["g1", "g2"]);
    }

    #[tokio::test]
    async fn test_priority_order_respected() {
        let gw = ScriptedGateways::new(vec![
            ("low", Behavior::Serve(b"from-low")),
            ("high", Behavior::Serve(b"from-high")),
        ]);
        let retriever = ContentRetriever::new(
            vec![GatewayEndpoint::new("high", 5), GatewayEndpoint::new("low", 1)],
            gw.clone(),
            Duration::from_millis(200),
        );
        let bytes = retriever.fetch(&ContentId::parse(CID).unwrap()).await.unwrap();
        assert_eq!(bytes, b"from-low");
        assert_eq!(gw.calls(), vec!["low"]);
    }

    #[tokio::test]
    async fn test_not_found_and_empty_bodies_advance() {
        let gw = ScriptedGateways::new(vec![
            ("a", Behavior::NotFound),
            ("b", Behavior::Empty),
            ("c", Behavior::Serve(b"ok")),
        ]);
        let retriever =
            ContentRetriever::new(endpoints(&["a", "b", "c"]), gw.clone(), Duration::from_millis(200));
        assert_eq!(retriever.fetch(&ContentId::parse(CID).unwrap()).await.unwrap(), b"ok");
        assert_eq!(gw.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_bounded_by_timeouts() {
        let gw = ScriptedGateways::new(vec![
            ("slow1", Behavior::Hang),
            ("down", Behavior::Fail),
            ("slow2", Behavior::Hang),
        ]);
        let timeout = Duration::from_millis(100);
        let retriever =
            ContentRetriever::new(endpoints(&["slow1", "down", "slow2"]), gw.clone(), timeout);

        let started = Instant::now();
        let err = retriever.fetch(&ContentId::parse(CID).unwrap()).await.unwrap_err();
        let elapsed = started.elapsed();

        match err {
            RetrievalError::Exhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Small scheduling slack on top of the sum of per-attempt timeouts
        assert!(elapsed <= retriever.worst_case_latency() + Duration::from_millis(100));
        assert_eq!(gw.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_no_gateways() {
        let gw = ScriptedGateways::new(vec![]);
        let retriever = ContentRetriever::new(Vec::new(), gw, Duration::from_millis(10));
        assert!(matches!(
            retriever.fetch(&ContentId::parse(CID).unwrap()).await,
            Err(RetrievalError::NoGateways)
        ));
    }
}

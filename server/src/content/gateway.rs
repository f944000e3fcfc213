//! Gateway endpoints and the transport used to reach them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::content::cid::ContentId;

/// One HTTP front door to the storage network. Lower priority is tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    pub base_url: String,
    #[serde(default)]
    pub priority: u32,
}

impl GatewayEndpoint {
    pub fn new(base_url: impl Into<String>, priority: u32) -> Self {
        Self {
            base_url: base_url.into(),
            priority,
        }
    }

    /// `{base_url}/{cid}`
    pub fn url_for(&self, cid: &ContentId) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), cid)
    }
}

/// Transport-independent view of a gateway reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub body: Vec<u8>,
    /// The gateway reported the content as present.
    pub found: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("connection to gateway failed: {0}")]
    Connection(String),

    #[error("gateway returned an unreadable body: {0}")]
    Body(String),
}

/// A single retrieval attempt against one gateway.
///
/// Implementations do not retry; failover and timeouts belong to the retriever.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn get(
        &self,
        endpoint: &GatewayEndpoint,
        cid: &ContentId,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// reqwest-backed gateway client.
#[derive(Clone)]
pub struct HttpGatewayClient {
    client: reqwest::Client,
}

impl HttpGatewayClient {
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("delivery-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn get(
        &self,
        endpoint: &GatewayEndpoint,
        cid: &ContentId,
    ) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .get(endpoint.url_for(cid))
            .send()
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        let found = response.status().is_success();
        if !found {
            tracing::debug!(
                gateway = %endpoint.base_url,
                status = %response.status(),
                "Gateway does not have content"
            );
            return Ok(GatewayResponse {
                body: Vec::new(),
                found,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Body(e.to_string()))?;
        Ok(GatewayResponse {
            body: body.to_vec(),
            found,
        })
    }
}

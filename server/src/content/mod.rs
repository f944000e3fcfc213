//! Content identifiers and retrieval from the content-addressable storage network.
//!
//! Assets are addressed by a self-describing identifier (`Qm` + 44 base58-ish
//! characters). Retrieval goes through an ordered list of HTTP gateways with a
//! bounded timeout per attempt and failover to the next gateway.

pub mod cid;
pub mod gateway;
pub mod retriever;

pub use cid::{extract_content_id, ContentId, InvalidContentId};
pub use gateway::{GatewayClient, GatewayEndpoint, GatewayError, GatewayResponse, HttpGatewayClient};
pub use retriever::{ContentRetriever, RetrievalError};

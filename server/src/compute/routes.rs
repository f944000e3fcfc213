//! POST /compute: run a registered algorithm over a catalogued asset.
//!
//! Only the algorithm's textual result is ever returned; asset bytes never
//! leave the server through this endpoint, whatever the asset's delivery mode.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::content::ContentId;
use crate::delivery::{DeliveryResult, DeliveryStatus};
use crate::state::AppState;

/// Body or content id could not be understood; nothing was resolved.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// A handler panicked.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeRequest {
    #[serde(alias = "content_id", alias = "cid")]
    pub content_id: String,
    /// Falls back to the configured default algorithm.
    #[serde(default, alias = "algorithm_id", alias = "algorithm")]
    pub algorithm_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Serialize)]
pub struct ComputeResponse {
    pub status: ResponseStatus,
    pub result: String,
    pub code: &'static str,
}

impl ComputeResponse {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: message.into(),
            code,
        }
    }
}

/// HTTP status for a finished delivery.
pub fn http_status(status: DeliveryStatus) -> StatusCode {
    match status {
        DeliveryStatus::Delivered | DeliveryStatus::ComputeFailed => StatusCode::OK,
        DeliveryStatus::UnsupportedAlgorithm => StatusCode::BAD_REQUEST,
        DeliveryStatus::UnknownAsset => StatusCode::NOT_FOUND,
        DeliveryStatus::AuthError => StatusCode::UNPROCESSABLE_ENTITY,
        DeliveryStatus::NetworkError => StatusCode::BAD_GATEWAY,
    }
}

fn to_response(result: DeliveryResult) -> (StatusCode, Json<ComputeResponse>) {
    let code = http_status(result.status);
    let body = match result.computed() {
        Some(text) if result.is_delivered() => ComputeResponse {
            status: ResponseStatus::Success,
            result: text.to_string(),
            code: result.status.as_str(),
        },
        _ => ComputeResponse::error(result.status.as_str(), result.message),
    };
    (code, Json(body))
}

/// POST /compute
///
/// Body: `{"contentId": "Qm...", "algorithmId": "dataset_summary"}`.
pub async fn compute_route(
    State(state): State<AppState>,
    payload: Result<Json<ComputeRequest>, JsonRejection>,
) -> (StatusCode, Json<ComputeResponse>) {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ComputeResponse::error(
                    INVALID_REQUEST,
                    format!("invalid request body: {}", rejection.body_text()),
                )),
            );
        }
    };

    let cid = match ContentId::parse(&request.content_id) {
        Ok(cid) => cid,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ComputeResponse::error(INVALID_REQUEST, e.to_string())),
            );
        }
    };
    let algorithm = request
        .algorithm_id
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| state.dispatcher.default_algorithm().to_string());

    tracing::info!(content_id = %cid, algorithm = %algorithm, "Compute requested");
    to_response(state.dispatcher.compute(&cid, &algorithm).await)
}

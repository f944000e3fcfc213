use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::catch_panic::CatchPanicLayer;

use crate::compute::routes as compute_routes;
use crate::state::AppState;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on the compute endpoint, keyed by peer IP.
    // PeerIpKeyExtractor reads from ConnectInfo<SocketAddr>.
    let per_minute = u64::from(state.compute_rate_per_minute.max(1));
    let governor_config = GovernorConfigBuilder::default()
        .key_extractor(PeerIpKeyExtractor)
        .per_millisecond((60_000 / per_minute).max(1))
        .burst_size(state.compute_rate_burst.max(1))
        .finish()
        .map(Arc::new);

    let compute = Router::new().route(
        "/compute",
        axum::routing::post(compute_routes::compute_route),
    );
    let compute = match governor_config {
        Some(config) => {
            // Spawn background task to clean up rate limiter state
            let limiter = config.limiter().clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    limiter.retain_recent();
                }
            });
            compute.layer(GovernorLayer { config })
        }
        None => {
            tracing::warn!("Invalid rate limit settings, /compute is not rate limited");
            compute
        }
    };

    let health = Router::new().route("/health", axum::routing::get(health_check));

    with_fault_barrier(Router::new().merge(compute).merge(health).with_state(state))
}

/// Outermost layer: a panicking handler answers 500 and the server keeps serving.
fn with_fault_barrier(router: Router) -> Router {
    router.layer(CatchPanicLayer::custom(panic_response))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let watcher = state
        .watcher
        .as_ref()
        .map(|rx| serde_json::to_value(&*rx.borrow()).unwrap_or_default())
        .unwrap_or(serde_json::Value::Null);
    let uptime = chrono::Utc::now() - state.started_at;

    Json(serde_json::json!({
        "status": "online",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime.num_seconds(),
        "watcher": watcher,
        "gateways": state.dispatcher.retriever().endpoints().len(),
        "algorithms": state.dispatcher.executor().algorithms(),
    }))
}

/// Turn a panic inside a handler into the usual JSON error body.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!("Request handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "status": "error",
            "result": "internal server error",
            "code": compute_routes::INTERNAL_ERROR,
        })),
    )
        .into_response()
}

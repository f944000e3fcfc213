use std::sync::Arc;

use tokio::sync::watch;

use crate::delivery::Dispatcher;
use crate::ledger::WatcherStatus;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Delivery pipeline shared with the ledger watcher
    pub dispatcher: Arc<Dispatcher>,
    /// Latest watcher status; `None` when no ledger is configured
    pub watcher: Option<watch::Receiver<WatcherStatus>>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Requests per minute per peer IP on POST /compute
    pub compute_rate_per_minute: u32,
    pub compute_rate_burst: u32,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            watcher: None,
            started_at: chrono::Utc::now(),
            compute_rate_per_minute: 30,
            compute_rate_burst: 10,
        }
    }

    pub fn with_watcher(mut self, status: watch::Receiver<WatcherStatus>) -> Self {
        self.watcher = Some(status);
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32, burst: u32) -> Self {
        self.compute_rate_per_minute = per_minute;
        self.compute_rate_burst = burst;
        self
    }
}

//! Polling watcher for purchase events.
//!
//! State machine: `INIT -> CONNECTED -> WATCHING <-> DISCONNECTED`.
//!
//! Delivery is at-least-once: the block cursor only moves past a range after
//! every event in it has been handed to the handler, so a restart (or a
//! cancelled tick) may replay events. Handlers must tolerate duplicates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::ledger::decode::decode_log;
use crate::ledger::{LedgerClient, LedgerError, LogFilter, PurchaseEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatcherState {
    Init,
    Connected,
    Watching,
    Disconnected,
}

/// Snapshot published after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherStatus {
    pub state: WatcherState,
    pub last_processed_block: Option<u64>,
    pub events_handled: u64,
    pub logs_skipped: u64,
    pub last_error: Option<String>,
}

impl Default for WatcherStatus {
    fn default() -> Self {
        Self {
            state: WatcherState::Init,
            last_processed_block: None,
            events_handled: 0,
            logs_skipped: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    /// First block to scan. `None` starts at the chain head seen on connect.
    pub start_block: Option<u64>,
    /// Largest block range requested in one `get_logs` call.
    pub max_block_range: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            reconnect_attempts: 3,
            reconnect_backoff: Duration::from_secs(2),
            start_block: None,
            max_block_range: 5_000,
        }
    }
}

/// Consumer of decoded purchase events, called strictly in block order.
#[async_trait]
pub trait PurchaseHandler: Send + Sync {
    async fn handle(&self, event: PurchaseEvent);
}

pub struct LedgerWatcher {
    client: Arc<dyn LedgerClient>,
    filter: LogFilter,
    settings: WatcherSettings,
    status: WatcherStatus,
    status_tx: watch::Sender<WatcherStatus>,
}

impl LedgerWatcher {
    pub fn new(client: Arc<dyn LedgerClient>, filter: LogFilter, settings: WatcherSettings) -> Self {
        let (status_tx, _) = watch::channel(WatcherStatus::default());
        Self {
            client,
            filter,
            settings,
            status: WatcherStatus::default(),
            status_tx,
        }
    }

    /// Receiver that observes the status after every tick.
    pub fn subscribe(&self) -> watch::Receiver<WatcherStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> WatcherState {
        self.status.state
    }

    pub fn status(&self) -> &WatcherStatus {
        &self.status
    }

    /// One poll step. Returns the number of events handed to `handler`.
    pub async fn tick(&mut self, handler: &dyn PurchaseHandler) -> usize {
        let handled = self.step(handler).await;
        self.status_tx.send_replace(self.status.clone());
        handled
    }

    async fn step(&mut self, handler: &dyn PurchaseHandler) -> usize {
        if matches!(self.status.state, WatcherState::Init | WatcherState::Disconnected) {
            if !self.reconnect().await {
                return 0;
            }
            self.status.state = WatcherState::Connected;
            tracing::info!("Connected to ledger");
        }

        if self.status.state == WatcherState::Connected {
            if self.status.last_processed_block.is_none() {
                let start = match self.settings.start_block {
                    Some(block) => block,
                    None => match self.client.current_block_height().await {
                        Ok(height) => height,
                        Err(e) => {
                            self.disconnect(e);
                            return 0;
                        }
                    },
                };
                self.status.last_processed_block = Some(start);
            }
            self.status.state = WatcherState::Watching;
            tracing::info!(
                "Watching {} for purchases from block {}",
                self.filter.contract_address,
                self.status.last_processed_block.unwrap_or_default()
            );
        }

        match self.poll(handler).await {
            Ok(handled) => handled,
            Err(e) => {
                self.disconnect(e);
                0
            }
        }
    }

    async fn poll(&mut self, handler: &dyn PurchaseHandler) -> Result<usize, LedgerError> {
        let from = self.status.last_processed_block.unwrap_or_default();
        let current = self.client.current_block_height().await?;
        if current < from {
            return Ok(0);
        }
        let to = current.min(from.saturating_add(self.settings.max_block_range.max(1) - 1));

        let logs = self.client.get_logs(from, to, &self.filter).await?;
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_log(log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    self.status.logs_skipped += 1;
                    tracing::warn!(
                        tx = log.transaction_hash.as_deref().unwrap_or("?"),
                        "Skipping malformed purchase log: {}",
                        e
                    );
                }
            }
        }
        events.sort_by_key(|e| (e.block_number, e.log_index));

        let count = events.len();
        for event in events {
            tracing::info!(
                tx = %event.transaction_id,
                buyer = %event.buyer_address,
                block = event.block_number,
                "New purchase detected"
            );
            handler.handle(event).await;
            self.status.events_handled += 1;
        }

        self.status.last_processed_block = Some(to + 1);
        self.status.last_error = None;
        tracing::debug!("Processed blocks {}..={} ({} events)", from, to, count);
        Ok(count)
    }

    async fn reconnect(&mut self) -> bool {
        let attempts = self.settings.reconnect_attempts.max(1);
        for attempt in 1..=attempts {
            if self.client.is_connected().await {
                return true;
            }
            tracing::warn!("Ledger connection attempt {}/{} failed", attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(self.settings.reconnect_backoff).await;
            }
        }
        self.status.state = WatcherState::Disconnected;
        self.status.last_error = Some("ledger unreachable".to_string());
        false
    }

    fn disconnect(&mut self, error: LedgerError) {
        tracing::error!("Ledger query failed, will reconnect: {}", error);
        self.status.state = WatcherState::Disconnected;
        self.status.last_error = Some(error.to_string());
    }

    /// Poll until `cancel` fires, sleeping `poll_interval` between ticks.
    pub async fn run(mut self, handler: Arc<dyn PurchaseHandler>, cancel: CancellationToken) {
        tracing::info!(
            "Ledger watcher started (interval {}ms)",
            self.settings.poll_interval.as_millis()
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.tick(&*handler) => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        tracing::info!("Ledger watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RawLog;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    struct FakeLedger {
        connected: AtomicBool,
        height: AtomicU64,
        fail_logs: AtomicBool,
        logs: Mutex<Vec<RawLog>>,
        queries: Mutex<Vec<(u64, u64)>>,
    }

    impl FakeLedger {
        fn new(height: u64) -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(true),
                height: AtomicU64::new(height),
                fail_logs: AtomicBool::new(false),
                logs: Mutex::new(Vec::new()),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn push_log(&self, block: u64, index: u64, tx: &str) {
            self.logs.lock().unwrap().push(RawLog {
                topics: vec!["0xtopic".into(), format!("0x{:064x}", 0xb0b_u64)],
                data: "0x".into(),
                block_number: Some(format!("0x{:x}", block)),
                transaction_hash: Some(tx.into()),
                log_index: Some(format!("0x{:x}", index)),
                ..Default::default()
            });
        }
    }

    #[async_trait]
    impl LedgerClient for FakeLedger {
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn current_block_height(&self) -> Result<u64, LedgerError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(LedgerError::Connection("down".into()));
            }
            Ok(self.height.load(Ordering::SeqCst))
        }

        async fn get_logs(
            &self,
            from_block: u64,
            to_block: u64,
            _filter: &LogFilter,
        ) -> Result<Vec<RawLog>, LedgerError> {
            self.queries.lock().unwrap().push((from_block, to_block));
            if self.fail_logs.load(Ordering::SeqCst) {
                return Err(LedgerError::Connection("reset".into()));
            }
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| {
                    let b = u64::from_str_radix(
                        l.block_number.as_deref().unwrap().trim_start_matches("0x"),
                        16,
                    )
                    .unwrap();
                    (from_block..=to_block).contains(&b)
                })
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PurchaseHandler for Recorder {
        async fn handle(&self, event: PurchaseEvent) {
            self.seen.lock().unwrap().push(event.transaction_id);
        }
    }

    fn settings(start: Option<u64>) -> WatcherSettings {
        WatcherSettings {
            poll_interval: Duration::from_millis(10),
            reconnect_attempts: 2,
            reconnect_backoff: Duration::from_millis(1),
            start_block: start,
            max_block_range: 1_000,
        }
    }

    fn filter() -> LogFilter {
        LogFilter {
            contract_address: "0xmarket".into(),
            topic: "0xtopic".into(),
        }
    }

    #[tokio::test]
    async fn test_events_handled_in_block_order_and_cursor_advances() {
        let ledger = FakeLedger::new(10);
        ledger.push_log(7, 1, "tx-7b");
        ledger.push_log(3, 0, "tx-3");
        ledger.push_log(7, 0, "tx-7a");

        let mut watcher = LedgerWatcher::new(ledger.clone(), filter(), settings(Some(0)));
        let recorder = Recorder::default();

        assert_eq!(watcher.tick(&recorder).await, 3);
        assert_eq!(watcher.state(), WatcherState::Watching);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["tx-3", "tx-7a", "tx-7b"]);
        assert_eq!(watcher.status().last_processed_block, Some(11));

        // No new blocks: no query beyond the head
        assert_eq!(watcher.tick(&recorder).await, 0);
        ledger.height.store(12, Ordering::SeqCst);
        ledger.push_log(12, 0, "tx-12");
        assert_eq!(watcher.tick(&recorder).await, 1);
        assert_eq!(*ledger.queries.lock().unwrap(), vec![(0, 10), (11, 12)]);
    }

    #[tokio::test]
    async fn test_malformed_log_skipped() {
        let ledger = FakeLedger::new(5);
        ledger.push_log(2, 0, "tx-good");
        ledger.logs.lock().unwrap().push(RawLog {
            topics: vec!["0xtopic".into()],
            block_number: Some("0x2".into()),
            transaction_hash: Some("tx-bad".into()),
            ..Default::default()
        });

        let mut watcher = LedgerWatcher::new(ledger, filter(), settings(Some(0)));
        let recorder = Recorder::default();
        assert_eq!(watcher.tick(&recorder).await, 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["tx-good"]);
        assert_eq!(watcher.status().logs_skipped, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_advance_cursor() {
        let ledger = FakeLedger::new(5);
        ledger.push_log(4, 0, "tx-4");
        ledger.fail_logs.store(true, Ordering::SeqCst);

        let mut watcher = LedgerWatcher::new(ledger.clone(), filter(), settings(Some(1)));
        let recorder = Recorder::default();
        assert_eq!(watcher.tick(&recorder).await, 0);
        assert_eq!(watcher.state(), WatcherState::Disconnected);
        assert_eq!(watcher.status().last_processed_block, Some(1));

        // Recovers on the next tick and replays the same range
        ledger.fail_logs.store(false, Ordering::SeqCst);
        assert_eq!(watcher.tick(&recorder).await, 1);
        assert_eq!(watcher.state(), WatcherState::Watching);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["tx-4"]);
    }

    #[tokio::test]
    async fn test_reconnect_is_bounded_and_non_fatal() {
        let ledger = FakeLedger::new(5);
        ledger.connected.store(false, Ordering::SeqCst);

        let mut watcher = LedgerWatcher::new(ledger.clone(), filter(), settings(None));
        let status = watcher.subscribe();
        let recorder = Recorder::default();

        assert_eq!(watcher.tick(&recorder).await, 0);
        assert_eq!(watcher.state(), WatcherState::Disconnected);
        assert_eq!(status.borrow().state, WatcherState::Disconnected);

        ledger.connected.store(true, Ordering::SeqCst);
        watcher.tick(&recorder).await;
        assert_eq!(watcher.state(), WatcherState::Watching);
        // Started from the head seen at connect time
        assert_eq!(status.borrow().last_processed_block, Some(6));
    }

    #[tokio::test]
    async fn test_block_range_is_chunked() {
        let ledger = FakeLedger::new(2_500);
        let mut s = settings(Some(0));
        s.max_block_range = 1_000;
        let mut watcher = LedgerWatcher::new(ledger.clone(), filter(), s);
        let recorder = Recorder::default();
        for _ in 0..3 {
            watcher.tick(&recorder).await;
        }
        assert_eq!(
            *ledger.queries.lock().unwrap(),
            vec![(0, 999), (1_000, 1_999), (2_000, 2_500)]
        );
        assert_eq!(watcher.status().last_processed_block, Some(2_501));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let ledger = FakeLedger::new(1);
        let watcher = LedgerWatcher::new(ledger, filter(), settings(Some(0)));
        let status = watcher.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher.run(Arc::new(Recorder::default()), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("watcher did not stop")
            .unwrap();
        assert_eq!(status.borrow().state, WatcherState::Watching);
    }
}

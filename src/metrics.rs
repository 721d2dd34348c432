use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Metrics {
    api_requests: AtomicU64,
    retries: AtomicU64,
    token_refreshes: AtomicU64,
    pages_fetched: AtomicU64,
    entities_written: AtomicU64,
    units_executed: AtomicU64,
    units_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub api_requests: u64,
    pub retries: u64,
    pub token_refreshes: u64,
    pub pages_fetched: u64,
    pub entities_written: u64,
    pub units_executed: u64,
    pub units_skipped: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_api_request(&self) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_token_refresh(&self) {
        self.token_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_page(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_entity_written(&self) {
        self.entities_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_units(&self, executed: u64, skipped: u64) {
        self.units_executed.fetch_add(executed, Ordering::Relaxed);
        self.units_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            api_requests: self.api_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            token_refreshes: self.token_refreshes.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            entities_written: self.entities_written.load(Ordering::Relaxed),
            units_executed: self.units_executed.load(Ordering::Relaxed),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
        }
    }
}

pub fn spawn_metrics_logger(metrics: Arc<Metrics>, interval: Duration) {
    thread::spawn(move || loop {
        thread::sleep(interval);
        let snap = metrics.snapshot();
        tracing::info!(
            api_requests = snap.api_requests,
            retries = snap.retries,
            token_refreshes = snap.token_refreshes,
            pages = snap.pages_fetched,
            entities = snap.entities_written,
            units_executed = snap.units_executed,
            units_skipped = snap.units_skipped,
            "metrics"
        );
    });
}

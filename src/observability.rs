//! Logging setup and in-process pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Honors `RUST_LOG`, falling back to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Metrics handle for recording pipeline counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_accepted: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
    downloads_recovered: AtomicU64,
    callbacks_delivered: AtomicU64,
    callbacks_requeued: AtomicU64,
    callbacks_failed: AtomicU64,
    callbacks_recovered: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_accepted(&self) {
        self.jobs_accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_accepted", "Metric incremented");
    }

    pub fn download_succeeded(&self) {
        self.downloads_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_succeeded", "Metric incremented");
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "downloads_failed", "Metric incremented");
    }

    pub fn downloads_recovered(&self, count: u64) {
        self.downloads_recovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn callback_delivered(&self) {
        self.callbacks_delivered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "callbacks_delivered", "Metric incremented");
    }

    pub fn callback_requeued(&self) {
        self.callbacks_requeued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "callbacks_requeued", "Metric incremented");
    }

    pub fn callback_failed(&self) {
        self.callbacks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "callbacks_failed", "Metric incremented");
    }

    pub fn callbacks_recovered(&self, count: u64) {
        self.callbacks_recovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_accepted: self.jobs_accepted.load(Ordering::Relaxed),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            downloads_recovered: self.downloads_recovered.load(Ordering::Relaxed),
            callbacks_delivered: self.callbacks_delivered.load(Ordering::Relaxed),
            callbacks_requeued: self.callbacks_requeued.load(Ordering::Relaxed),
            callbacks_failed: self.callbacks_failed.load(Ordering::Relaxed),
            callbacks_recovered: self.callbacks_recovered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub jobs_accepted: u64,
    pub downloads_succeeded: u64,
    pub downloads_failed: u64,
    pub downloads_recovered: u64,
    pub callbacks_delivered: u64,
    pub callbacks_requeued: u64,
    pub callbacks_failed: u64,
    pub callbacks_recovered: u64,
}

//! Callback notifier
//!
//! Drains the pending-callback queue and reports each concluded download to
//! the job's `callback_url`. A single dispatcher feeds a bounded pool of
//! delivery tasks; delivery itself lives in [`delivery`].
//!
//! On startup the notifier requeues "rogue" callbacks: records whose
//! `callback_state` was left `in_progress` by a process that died mid-delivery,
//! plus concluded downloads whose callback was never queued.

mod delivery;

pub use delivery::{CallbackInfo, DeliveryOutcome, job_download_url};

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Url};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::NotifierConfig;
use crate::dispatch::Dispatcher;
use crate::job::Job;
use crate::observability::Metrics;
use crate::store::{JobStore, RecoveryTarget, StoreError, requeue_interrupted};

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("notifier concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("max_callback_attempts must be at least 1")]
    InvalidAttemptLimit,

    #[error("invalid download URL '{url}': {reason}")]
    InvalidDownloadUrl { url: String, reason: String },

    #[error("failed to build callback client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct Notifier {
    store: Arc<dyn JobStore>,
    client: Client,
    download_url: Url,
    metrics: Arc<Metrics>,
    concurrency: usize,
    max_attempts: u32,
    poll_interval: Duration,
    scan_batch_size: usize,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn JobStore>,
        config: &NotifierConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, NotifierError> {
        if config.concurrency == 0 {
            return Err(NotifierError::InvalidConcurrency);
        }
        if config.max_callback_attempts == 0 {
            return Err(NotifierError::InvalidAttemptLimit);
        }

        let download_url = parse_download_url(&config.download_url)?;
        let client = Client::builder()
            .timeout(config.callback_timeout())
            .build()?;

        Ok(Self {
            store,
            client,
            download_url,
            metrics,
            concurrency: config.concurrency,
            max_attempts: config.max_callback_attempts,
            poll_interval: config.poll_interval(),
            scan_batch_size: config.scan_batch_size.max(1),
        })
    }

    /// Requeue rogue callbacks, then deliver callbacks until `shutdown`
    ///
    /// Returns once every in-flight delivery has finished.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let recovered = self.collect_rogue_callbacks().await;
        info!(recovered, "Queued rogue callbacks");

        let dispatcher = Dispatcher::new("notifier", self.concurrency, self.poll_interval);
        dispatcher
            .run(
                &shutdown,
                || self.store.pop_callback(),
                |job| {
                    let notifier = Arc::clone(&self);
                    async move { notifier.deliver(job).await }
                },
            )
            .await;
    }

    /// Requeue every job whose callback was interrupted mid-delivery or
    /// never reached the queue
    ///
    /// Records are queued as they are; their state is left untouched.
    pub async fn collect_rogue_callbacks(&self) -> u64 {
        let recovered = requeue_interrupted(
            self.store.as_ref(),
            RecoveryTarget::Callbacks,
            self.scan_batch_size,
        )
        .await;
        self.metrics.callbacks_recovered(recovered);
        recovered
    }

    async fn deliver(&self, mut job: Job) {
        if let Err(e) = self.notify(&mut job).await {
            error!(job_id = %job.id, error = %e, "Notify error");
        }
    }
}

fn parse_download_url(raw: &str) -> Result<Url, NotifierError> {
    let url = Url::parse(raw).map_err(|e| NotifierError::InvalidDownloadUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(NotifierError::InvalidDownloadUrl {
            url: raw.to_string(),
            reason: "URL cannot carry path segments".to_string(),
        });
    }
    Ok(url)
}

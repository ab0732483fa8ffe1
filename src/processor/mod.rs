//! Download processor
//!
//! Drains the pending-download queue, fetches each job's source URL into file
//! storage and hands the job to the notifier by enqueueing it on the
//! pending-callback queue. Whatever the download outcome, the job always
//! reaches the callback queue with a concluded `download_state`.

mod http;

pub use http::{DownloadError, HttpClient, HttpConfig};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ProcessorConfig;
use crate::dispatch::Dispatcher;
use crate::job::{Job, JobState};
use crate::observability::Metrics;
use crate::storage::{StorageClient, StorageError};
use crate::store::{JobStore, RecoveryTarget, StoreError, requeue_interrupted};

const RECOVERY_BATCH_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("HTTP client error: {0}")]
    Http(#[from] DownloadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub struct Processor {
    store: Arc<dyn JobStore>,
    storage: StorageClient,
    http: HttpClient,
    metrics: Arc<Metrics>,
    concurrency: usize,
    poll_interval: Duration,
    default_timeout: Duration,
}

impl Processor {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: StorageClient,
        config: &ProcessorConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ProcessorError> {
        if config.concurrency == 0 {
            return Err(ProcessorError::InvalidConcurrency);
        }

        let http = HttpClient::new(HttpConfig {
            max_retries: config.max_retries,
            user_agent: config.user_agent.clone(),
            ..HttpConfig::default()
        })?;

        Ok(Self {
            store,
            storage,
            http,
            metrics,
            concurrency: config.concurrency,
            poll_interval: config.poll_interval(),
            default_timeout: config.download_timeout(),
        })
    }

    /// Requeue unfinished downloads, then process jobs until `shutdown`
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let recovered = self.recover_interrupted_downloads().await;
        info!(recovered, "Queued interrupted downloads");

        let dispatcher = Dispatcher::new("processor", self.concurrency, self.poll_interval);
        dispatcher
            .run(
                &shutdown,
                || self.store.pop_download(),
                |job| {
                    let processor = Arc::clone(&self);
                    async move { processor.handle(job).await }
                },
            )
            .await;
    }

    pub async fn recover_interrupted_downloads(&self) -> u64 {
        let recovered =
            requeue_interrupted(self.store.as_ref(), RecoveryTarget::Downloads, RECOVERY_BATCH_SIZE)
                .await;
        self.metrics.downloads_recovered(recovered);
        recovered
    }

    async fn handle(&self, mut job: Job) {
        // Startup recovery can queue a job the API is queueing at the same time
        if job.download_state.is_concluded() {
            debug!(job_id = %job.id, state = ?job.download_state, "Download already concluded");
            return;
        }
        if let Err(e) = self.process(&mut job).await {
            error!(job_id = %job.id, error = %e, "Processing error");
        }
    }

    /// Download one job and hand it to the notifier
    pub async fn process(&self, job: &mut Job) -> Result<(), ProcessorError> {
        job.download_state = JobState::InProgress;
        job.download_meta.clear();
        self.store.save_job(job).await?;

        let timeout = job
            .download_timeout
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        match self.fetch(job, timeout).await {
            Ok(size) => {
                info!(job_id = %job.id, aggr_id = %job.aggr_id, size, "Download stored");
                job.download_state = JobState::Success;
                self.metrics.download_succeeded();
            }
            Err(reason) => {
                warn!(job_id = %job.id, aggr_id = %job.aggr_id, url = %job.url, error = %reason, "Download failed");
                job.download_state = JobState::Failed;
                job.download_meta = reason;
                self.metrics.download_failed();
            }
        }

        self.store.save_job(job).await?;
        self.store.queue_pending_callback(job).await?;
        Ok(())
    }

    async fn fetch(&self, job: &Job, timeout: Duration) -> Result<usize, String> {
        let bytes = self
            .http
            .download(&job.url, timeout)
            .await
            .map_err(|e| e.to_string())?;

        self.storage
            .upload(&job.id, bytes)
            .await
            .map(|meta| meta.size)
            .map_err(|e: StorageError| format!("storage: {e}"))
    }
}

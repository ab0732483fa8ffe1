//! Durable job store and pending queues
//!
//! The [`JobStore`] trait is the only shared mutable state in the pipeline.
//! Both the processor and the notifier consume it:
//!
//! - a job table keyed by job id
//! - a pending-download queue (filled by the API, drained by the processor)
//! - a pending-callback queue (filled by the processor, drained by the notifier)
//! - a cursor-based key scan used by crash recovery
//!
//! Implementations must hand out a queued job at most once per enqueue, and a
//! job id is present in a given queue at most once.
//!
//! [`FjallJobStore`] is the embedded implementation backed by a fjall keyspace.

mod embedded;
pub mod keys;
pub mod recovery;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::Job;

pub use embedded::FjallJobStore;
pub use keys::JOB_KEY_PREFIX;
pub use recovery::{RecoveryTarget, requeue_interrupted};

#[derive(Debug, Error)]
pub enum StoreError {
    /// No queued work right now
    #[error("queue is empty")]
    EmptyQueue,

    /// Queue exists but is leased by another consumer
    #[error("queue is busy, retry later")]
    RetryLater,

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Stored bookkeeping that cannot be decoded
    #[error("store is corrupted: {0}")]
    Corrupted(String),

    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Expected signals from a pop that only call for a backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::EmptyQueue | StoreError::RetryLater)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Resumable position of a key scan
///
/// A scan starts from [`ScanCursor::start`] and is finished once the store
/// hands the start sentinel back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCursor(Option<String>);

impl ScanCursor {
    pub fn start() -> Self {
        Self(None)
    }

    pub fn after(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn is_start(&self) -> bool {
        self.0.is_none()
    }

    /// Last key returned by the previous page, if any
    pub fn last_key(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Job table plus the two pending queues
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist the full record, overwriting any previous version
    async fn save_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Job>;

    async fn remove_job(&self, id: &str) -> Result<()>;

    /// Enqueue for download; a no-op if the job is already queued
    async fn queue_pending_download(&self, job: &Job) -> Result<()>;

    async fn pop_download(&self) -> Result<Job>;

    /// Enqueue for callback delivery; a no-op if the job is already queued
    async fn queue_pending_callback(&self, job: &Job) -> Result<()>;

    async fn pop_callback(&self) -> Result<Job>;

    /// Return up to `batch_size` job-record keys starting with `prefix`
    /// after `cursor`, plus the cursor for the next page
    async fn scan_keys(
        &self,
        cursor: ScanCursor,
        prefix: &str,
        batch_size: usize,
    ) -> Result<(Vec<String>, ScanCursor)>;
}

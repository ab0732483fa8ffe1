//! Job records tracked by the downloader.
//!
//! A [`Job`] carries two independent state machines:
//!
//! - the download side, driven by the processor
//!   (`pending -> in_progress -> success | failed`)
//! - the callback side, driven by the notifier
//!   (`pending -> in_progress -> removed | failed`)
//!
//! Records are created through [`Job::from_request`], which validates a client
//! submission before anything is written to the store.

mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use validation::JobValidationError;

/// State shared by the download and callback sub-state machines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    InProgress,
    Success,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::InProgress => "in_progress",
            JobState::Success => "success",
            JobState::Failed => "failed",
        }
    }

    /// True once the download side has an outcome to report
    pub fn is_concluded(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single download job and its callback bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub aggr_id: String,
    pub url: String,
    pub callback_url: String,
    #[serde(default)]
    pub extra: String,
    /// Per-job download timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_timeout: Option<u64>,

    #[serde(default)]
    pub download_state: JobState,
    #[serde(default)]
    pub download_meta: String,

    #[serde(default)]
    pub callback_state: JobState,
    #[serde(default)]
    pub callback_meta: String,
    #[serde(default)]
    pub callback_count: u32,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending job with a time-sortable UUIDv7 id
    pub fn new(
        aggr_id: impl Into<String>,
        url: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            aggr_id: aggr_id.into(),
            url: url.into(),
            callback_url: callback_url.into(),
            extra: String::new(),
            download_timeout: None,
            download_state: JobState::Pending,
            download_meta: String::new(),
            callback_state: JobState::Pending,
            callback_meta: String::new(),
            callback_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Decode and validate a client submission
    pub fn from_request(data: &[u8]) -> Result<Self, JobValidationError> {
        validation::decode_submission(data)
    }
}

//! Single callback delivery attempt and the retry/fail transition

use reqwest::{StatusCode, Url, header::CONTENT_TYPE};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Notifier, NotifierError};
use crate::job::{Job, JobState};

/// Body POSTed to a job's callback URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackInfo {
    pub success: bool,
    pub error: String,
    pub extra: String,
    pub download_url: String,
}

/// What a delivery attempt did with the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Callback acknowledged and the job record removed
    Delivered,
    /// Attempt failed; the job is back on the pending-callback queue
    Requeued,
    /// Attempts exhausted; the record is kept with `callback_state = failed`
    Failed,
}

/// Reasons an attempt did not reach a 2xx response
#[derive(Debug, Error)]
enum DeliveryError {
    #[error("download is not concluded (download_state = {0})")]
    NotConcluded(JobState),

    #[error("could not encode callback payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("callback request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("callback returned HTTP {0}")]
    Status(StatusCode),
}

/// Public URL of a job's downloaded file; empty unless the download succeeded
pub fn job_download_url(job: &Job, base: &Url) -> String {
    if job.download_state != JobState::Success {
        return String::new();
    }

    let mut url = base.clone();
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop_if_empty().push(&job.id);
        }
        // Rejected when the notifier is built
        Err(()) => return String::new(),
    }
    url.to_string()
}

impl CallbackInfo {
    fn for_job(job: &Job, download_base: &Url) -> Result<Self, DeliveryError> {
        if !job.download_state.is_concluded() {
            return Err(DeliveryError::NotConcluded(job.download_state));
        }

        Ok(Self {
            success: job.download_state == JobState::Success,
            error: job.download_meta.clone(),
            extra: job.extra.clone(),
            download_url: job_download_url(job, download_base),
        })
    }
}

impl Notifier {
    /// Run one delivery attempt for `job`
    ///
    /// The attempt is counted and persisted as `in_progress` before any
    /// network I/O. A failed persist aborts the attempt with an error and the
    /// job stays wherever it was; the startup scan picks it up again.
    pub async fn notify(&self, job: &mut Job) -> Result<DeliveryOutcome, NotifierError> {
        job.callback_count += 1;
        self.mark_in_progress(job).await?;

        match self.attempt(job).await {
            Ok(()) => {
                self.store.remove_job(&job.id).await?;
                self.metrics.callback_delivered();
                info!(
                    job_id = %job.id,
                    aggr_id = %job.aggr_id,
                    attempt = job.callback_count,
                    "Callback delivered"
                );
                Ok(DeliveryOutcome::Delivered)
            }
            Err(e) => self.retry_or_fail(job, e).await,
        }
    }

    async fn mark_in_progress(&self, job: &mut Job) -> Result<(), NotifierError> {
        job.callback_state = JobState::InProgress;
        job.callback_meta.clear();
        self.store.save_job(job).await?;
        Ok(())
    }

    async fn attempt(&self, job: &Job) -> Result<(), DeliveryError> {
        let info = CallbackInfo::for_job(job, &self.download_url)?;
        let body = serde_json::to_vec(&info)?;

        debug!(job_id = %job.id, callback_url = %job.callback_url, "Posting callback");

        let response = self
            .client
            .post(&job.callback_url)
            .header(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }
        Ok(())
    }

    async fn retry_or_fail(
        &self,
        job: &mut Job,
        reason: DeliveryError,
    ) -> Result<DeliveryOutcome, NotifierError> {
        if job.callback_count >= self.max_attempts {
            self.mark_failed(job, reason.to_string()).await?;
            return Ok(DeliveryOutcome::Failed);
        }

        warn!(
            job_id = %job.id,
            attempt = job.callback_count,
            error = %reason,
            "Callback attempt failed, requeueing"
        );
        self.store.queue_pending_callback(job).await?;
        self.metrics.callback_requeued();
        Ok(DeliveryOutcome::Requeued)
    }

    async fn mark_failed(&self, job: &mut Job, reason: String) -> Result<(), NotifierError> {
        job.callback_state = JobState::Failed;
        job.callback_meta = reason;

        warn!(
            job_id = %job.id,
            aggr_id = %job.aggr_id,
            callback_url = %job.callback_url,
            attempts = job.callback_count,
            error = %job.callback_meta,
            "Callback failed permanently"
        );

        self.store.save_job(job).await?;
        self.metrics.callback_failed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("http://files.local/dl").unwrap()
    }

    fn job(download_state: JobState) -> Job {
        let mut job = Job::new("aggr-1", "http://src/file", "http://dst/cb");
        job.download_state = download_state;
        job
    }

    #[test]
    fn test_payload_for_failed_download() {
        let mut job = job(JobState::Failed);
        job.download_meta = "some error".to_string();
        job.extra = "some extra".to_string();

        let info = CallbackInfo::for_job(&job, &base()).unwrap();
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({
                "success": false,
                "error": "some error",
                "extra": "some extra",
                "download_url": ""
            })
        );
    }

    #[test]
    fn test_payload_for_successful_download() {
        let mut job = job(JobState::Success);
        job.extra = "some extra".to_string();

        let info = CallbackInfo::for_job(&job, &base()).unwrap();
        assert!(info.success);
        assert_eq!(info.error, "");
        assert_eq!(info.download_url, format!("http://files.local/dl/{}", job.id));
    }

    #[test]
    fn test_unconcluded_download_is_not_reported() {
        for state in [JobState::Pending, JobState::InProgress] {
            assert!(matches!(
                CallbackInfo::for_job(&job(state), &base()),
                Err(DeliveryError::NotConcluded(s)) if s == state
            ));
        }
    }

    #[test]
    fn test_download_url_only_on_success() {
        assert_eq!(job_download_url(&job(JobState::Failed), &base()), "");
        assert_eq!(job_download_url(&job(JobState::Pending), &base()), "");

        let done = job(JobState::Success);
        assert_eq!(
            job_download_url(&done, &base()),
            format!("http://files.local/dl/{}", done.id)
        );
    }

    #[test]
    fn test_download_url_joins_path_segments() {
        let done = job(JobState::Success);

        let trailing = Url::parse("http://files.local/dl/").unwrap();
        assert_eq!(
            job_download_url(&done, &trailing),
            format!("http://files.local/dl/{}", done.id)
        );

        let root = Url::parse("https://files.local").unwrap();
        assert_eq!(
            job_download_url(&done, &root),
            format!("https://files.local/{}", done.id)
        );
    }
}

//! Startup reconciliation of work orphaned by a crashed process
//!
//! A live process always moves `in_progress` forward, so any record still
//! marked `in_progress` when the process starts was interrupted mid-flight and
//! is put back on its queue. Records are saved before they are enqueued, so a
//! crash in between leaves a record that is waiting for a queue it never
//! reached; those are requeued too. Enqueueing an id that is already queued is
//! a no-op. The scan itself never modifies records.

use tracing::{debug, error, warn};

use super::keys::decode_job_key;
use super::{JOB_KEY_PREFIX, JobStore, ScanCursor};
use crate::job::{Job, JobState};

/// Which sub-state machine to reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTarget {
    /// Downloads not yet concluded: `download_state = pending | in_progress`
    Downloads,
    /// Rogue callbacks (`callback_state = in_progress`) and concluded
    /// downloads whose callback never started
    Callbacks,
}

impl RecoveryTarget {
    fn needs_requeue(&self, job: &Job) -> bool {
        match self {
            RecoveryTarget::Downloads => matches!(
                job.download_state,
                JobState::Pending | JobState::InProgress
            ),
            RecoveryTarget::Callbacks => match job.callback_state {
                JobState::InProgress => true,
                JobState::Pending => job.download_state.is_concluded(),
                JobState::Success | JobState::Failed => false,
            },
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RecoveryTarget::Downloads => "downloads",
            RecoveryTarget::Callbacks => "callbacks",
        }
    }
}

/// Scan every job record and re-enqueue the orphaned ones
///
/// Per-record failures are logged and skipped; a failing scan page ends the
/// scan early. Returns the number of jobs re-enqueued.
pub async fn requeue_interrupted(
    store: &dyn JobStore,
    target: RecoveryTarget,
    batch_size: usize,
) -> u64 {
    let mut cursor = ScanCursor::start();
    let mut requeued = 0;

    loop {
        let (keys, next) = match store.scan_keys(cursor, JOB_KEY_PREFIX, batch_size).await {
            Ok(page) => page,
            Err(e) => {
                error!(recovery = target.as_str(), error = %e, "Recovery scan failed");
                break;
            }
        };

        for key in &keys {
            let Some(job_id) = decode_job_key(key) else {
                warn!(key = %key, "Skipping malformed job key");
                continue;
            };

            // Records removed since the page was read are simply gone.
            let job = match store.get_job(job_id).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(job_id, error = %e, "Could not read job during recovery");
                    continue;
                }
            };

            if !target.needs_requeue(&job) {
                continue;
            }

            let queued = match target {
                RecoveryTarget::Downloads => store.queue_pending_download(&job).await,
                RecoveryTarget::Callbacks => store.queue_pending_callback(&job).await,
            };

            match queued {
                Ok(()) => {
                    debug!(job_id, recovery = target.as_str(), "Requeued interrupted job");
                    requeued += 1;
                }
                Err(e) => {
                    error!(job_id, recovery = target.as_str(), error = %e, "Could not requeue job");
                }
            }
        }

        if next.is_start() {
            break;
        }
        cursor = next;
    }

    requeued
}

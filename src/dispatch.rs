//! Poll-and-hand-off loop shared by the processor and the notifier
//!
//! A single dispatcher pops jobs from a store queue and hands each one to a
//! bounded set of worker tasks. A worker slot is reserved *before* popping, so
//! the dispatcher never takes more jobs off the queue than it can process.
//! Empty, busy and failing queues all lead to the same fixed backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::job::Job;
use crate::store;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    name: &'static str,
    concurrency: usize,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(name: &'static str, concurrency: usize, poll_interval: Duration) -> Self {
        Self {
            name,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Run until `shutdown` fires, then wait for in-flight jobs to finish
    ///
    /// A job that has been popped is always handed to `handle`, even if
    /// shutdown was requested while the pop was pending.
    pub async fn run<P, PF, H, HF>(&self, shutdown: &CancellationToken, mut pop: P, handle: H)
    where
        P: FnMut() -> PF,
        PF: Future<Output = store::Result<Job>>,
        H: Fn(Job) -> HF,
        HF: Future<Output = ()> + Send + 'static,
    {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        info!(
            dispatcher = self.name,
            concurrency = self.concurrency,
            "Dispatcher started"
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match pop().await {
                Ok(job) => {
                    debug!(dispatcher = self.name, job_id = %job.id, "Handing job to worker");
                    let task = handle(job);
                    workers.spawn(async move {
                        task.await;
                        drop(permit);
                    });
                }
                Err(e) if e.is_transient() => {
                    drop(permit);
                    trace!(dispatcher = self.name, reason = %e, "Nothing to dispatch");
                    self.backoff(shutdown).await;
                }
                Err(e) => {
                    drop(permit);
                    error!(dispatcher = self.name, error = %e, "Failed to pop job");
                    self.backoff(shutdown).await;
                }
            }

            while let Some(result) = workers.try_join_next() {
                self.reap(result);
            }
        }

        info!(
            dispatcher = self.name,
            in_flight = workers.len(),
            "Shutdown requested, draining workers"
        );
        while let Some(result) = workers.join_next().await {
            self.reap(result);
        }
        info!(dispatcher = self.name, "Dispatcher stopped");
    }

    async fn backoff(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }

    fn reap(&self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            error!(dispatcher = self.name, error = %e, "Worker task panicked");
        }
    }
}

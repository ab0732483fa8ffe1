use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};

use super::keys::{
    Queue, decode_entry_seq, encode_entry_key, encode_entry_prefix, encode_job_key,
    encode_member_key,
};
use super::{JobStore, Result, ScanCursor, StoreError};
use crate::job::Job;

const META_NEXT_SEQ: &[u8] = b"next_seq";

/// Fjall-backed job table and pending queues
///
/// Architecture:
/// - `jobs` partition: job:{id} -> Job (JSON)
/// - `queues` partition: ordered queue entries plus membership markers,
///   always written together in one batch
/// - `metadata` partition: "next_seq" -> u64 (queue sequence counter)
///
/// Mutations of one queue are serialized by that queue's in-process lease. A
/// pop that finds the lease taken reports [`StoreError::RetryLater`] instead of
/// waiting.
#[derive(Clone)]
pub struct FjallJobStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    queues: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
    leases: Arc<QueueLeases>,
}

#[derive(Default)]
struct QueueLeases {
    downloads: Mutex<()>,
    callbacks: Mutex<()>,
}

impl QueueLeases {
    fn get(&self, queue: Queue) -> &Mutex<()> {
        match queue {
            Queue::Downloads => &self.downloads,
            Queue::Callbacks => &self.callbacks,
        }
    }
}

impl FjallJobStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening job store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let queues = keyspace.open_partition("queues", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let stored_seq = match metadata.get(META_NEXT_SEQ)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    StoreError::Corrupted(format!(
                        "next_seq holds {} bytes, expected 8",
                        bytes.len()
                    ))
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };

        // Enqueues on different queues may persist next_seq out of order
        let mut current_seq = stored_seq;
        for queue in [Queue::Downloads, Queue::Callbacks] {
            if let Some(entry) = queues.prefix(encode_entry_prefix(queue)).next_back() {
                let (key, _) = entry?;
                let seq = decode_entry_seq(&key).ok_or_else(|| {
                    StoreError::Corrupted(format!(
                        "malformed queue entry key {}",
                        String::from_utf8_lossy(&key)
                    ))
                })?;
                current_seq = current_seq.max(seq + 1);
            }
        }

        info!(current_seq, "Job store opened");

        Ok(Self {
            keyspace,
            jobs,
            queues,
            metadata,
            seq_counter: Arc::new(AtomicU64::new(current_seq)),
            leases: Arc::new(QueueLeases::default()),
        })
    }

    /// Number of entries currently waiting in a queue
    pub fn queue_len(&self, queue: Queue) -> Result<usize> {
        let mut len = 0;
        for item in self.queues.prefix(encode_entry_prefix(queue)) {
            item?;
            len += 1;
        }
        Ok(len)
    }

    /// Flush all writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Health check - verify the keyspace is readable
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(META_NEXT_SEQ)?;
        Ok(())
    }

    fn load_job(&self, id: &str) -> Result<Job> {
        match self.jobs.get(encode_job_key(id))? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Err(StoreError::JobNotFound(id.to_string())),
        }
    }

    fn enqueue(&self, queue: Queue, job_id: &str) -> Result<()> {
        let _lease = self
            .leases
            .get(queue)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let member_key = encode_member_key(queue, job_id);
        if self.queues.contains_key(&member_key)? {
            debug!(job_id, queue = queue.as_str(), "Job already queued");
            return Ok(());
        }

        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        let mut batch = self.keyspace.batch();
        batch.insert(&self.queues, encode_entry_key(queue, seq), job_id.as_bytes().to_vec());
        batch.insert(&self.queues, member_key, seq.to_be_bytes().to_vec());
        batch.insert(&self.metadata, META_NEXT_SEQ, (seq + 1).to_be_bytes().to_vec());
        batch.commit()?;

        debug!(seq, job_id, queue = queue.as_str(), "Job enqueued");
        Ok(())
    }

    fn pop(&self, queue: Queue) -> Result<Job> {
        let lease = match self.leases.get(queue).try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(StoreError::RetryLater),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let Some(entry) = self.queues.prefix(encode_entry_prefix(queue)).next() else {
            return Err(StoreError::EmptyQueue);
        };
        let (entry_key, value) = entry?;
        let job_id = String::from_utf8_lossy(&value).into_owned();

        let mut batch = self.keyspace.batch();
        batch.remove(&self.queues, entry_key);
        batch.remove(&self.queues, encode_member_key(queue, &job_id));
        batch.commit()?;
        drop(lease);

        debug!(job_id = %job_id, queue = queue.as_str(), "Job dequeued");

        self.load_job(&job_id).inspect_err(|e| {
            warn!(job_id = %job_id, queue = queue.as_str(), error = %e, "Dequeued job has no record");
        })
    }

    fn scan(
        &self,
        cursor: &ScanCursor,
        prefix: &str,
        batch_size: usize,
    ) -> Result<(Vec<String>, ScanCursor)> {
        let batch_size = batch_size.max(1);

        let lower = match cursor.last_key() {
            Some(last) if last.as_bytes() >= prefix.as_bytes() => {
                Bound::Excluded(last.as_bytes().to_vec())
            }
            _ => Bound::Included(prefix.as_bytes().to_vec()),
        };

        let mut keys = Vec::with_capacity(batch_size);
        for item in self.jobs.range((lower, Bound::<Vec<u8>>::Unbounded)) {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(String::from_utf8_lossy(&key).into_owned());
            if keys.len() == batch_size {
                break;
            }
        }

        let next = match keys.last() {
            Some(last) if keys.len() == batch_size => ScanCursor::after(last.clone()),
            _ => ScanCursor::start(),
        };

        Ok((keys, next))
    }
}

#[async_trait]
impl JobStore for FjallJobStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(encode_job_key(&job.id), value)?;
        debug!(job_id = %job.id, "Saved job");
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        self.load_job(id)
    }

    async fn remove_job(&self, id: &str) -> Result<()> {
        self.jobs.remove(encode_job_key(id))?;
        debug!(job_id = id, "Removed job");
        Ok(())
    }

    async fn queue_pending_download(&self, job: &Job) -> Result<()> {
        self.enqueue(Queue::Downloads, &job.id)
    }

    async fn pop_download(&self) -> Result<Job> {
        self.pop(Queue::Downloads)
    }

    async fn queue_pending_callback(&self, job: &Job) -> Result<()> {
        self.enqueue(Queue::Callbacks, &job.id)
    }

    async fn pop_callback(&self) -> Result<Job> {
        self.pop(Queue::Callbacks)
    }

    async fn scan_keys(
        &self,
        cursor: ScanCursor,
        prefix: &str,
        batch_size: usize,
    ) -> Result<(Vec<String>, ScanCursor)> {
        self.scan(&cursor, prefix, batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::store::JOB_KEY_PREFIX;
    use tempfile::TempDir;

    fn create_test_store() -> (FjallJobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallJobStore::open(temp_dir.path().join("jobs")).unwrap();
        (store, temp_dir)
    }

    fn create_test_job(aggr_id: &str) -> Job {
        Job::new(aggr_id, "http://src/x", "http://dst/cb")
    }

    #[tokio::test]
    async fn test_save_get_remove() {
        let (store, _temp) = create_test_store();
        let mut job = create_test_job("a");

        store.save_job(&job).await.unwrap();
        assert_eq!(store.get_job(&job.id).await.unwrap(), job);

        job.callback_count = 1;
        job.callback_state = JobState::InProgress;
        store.save_job(&job).await.unwrap();
        let stored = store.get_job(&job.id).await.unwrap();
        assert_eq!(stored.callback_count, 1);
        assert_eq!(stored.callback_state, JobState::InProgress);

        store.remove_job(&job.id).await.unwrap();
        assert!(matches!(
            store.get_job(&job.id).await,
            Err(StoreError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pop_empty_queue() {
        let (store, _temp) = create_test_store();
        assert!(matches!(
            store.pop_callback().await,
            Err(StoreError::EmptyQueue)
        ));
        assert!(matches!(
            store.pop_download().await,
            Err(StoreError::EmptyQueue)
        ));
    }

    #[tokio::test]
    async fn test_queue_is_fifo_and_isolated() {
        let (store, _temp) = create_test_store();
        let first = create_test_job("first");
        let second = create_test_job("second");

        for job in [&first, &second] {
            store.save_job(job).await.unwrap();
            store.queue_pending_callback(job).await.unwrap();
        }

        assert!(matches!(
            store.pop_download().await,
            Err(StoreError::EmptyQueue)
        ));
        assert_eq!(store.pop_callback().await.unwrap().id, first.id);
        assert_eq!(store.pop_callback().await.unwrap().id, second.id);
        assert!(matches!(
            store.pop_callback().await,
            Err(StoreError::EmptyQueue)
        ));
    }

    #[tokio::test]
    async fn test_enqueue_is_deduplicated() {
        let (store, _temp) = create_test_store();
        let job = create_test_job("a");
        store.save_job(&job).await.unwrap();

        store.queue_pending_callback(&job).await.unwrap();
        store.queue_pending_callback(&job).await.unwrap();
        assert_eq!(store.queue_len(Queue::Callbacks).unwrap(), 1);

        store.pop_callback().await.unwrap();
        store.queue_pending_callback(&job).await.unwrap();
        assert_eq!(store.queue_len(Queue::Callbacks).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_does_not_touch_record() {
        let (store, _temp) = create_test_store();
        let mut job = create_test_job("a");
        job.callback_state = JobState::InProgress;
        store.save_job(&job).await.unwrap();

        store.queue_pending_callback(&job).await.unwrap();

        let popped = store.pop_callback().await.unwrap();
        assert_eq!(popped.callback_state, JobState::InProgress);
    }

    #[tokio::test]
    async fn test_pop_while_leased_retries_later() {
        let (store, _temp) = create_test_store();
        let job = create_test_job("a");
        store.save_job(&job).await.unwrap();
        store.queue_pending_callback(&job).await.unwrap();

        let guard = store.leases.get(Queue::Callbacks).lock().unwrap();
        assert!(matches!(
            store.pop_callback().await,
            Err(StoreError::RetryLater)
        ));
        drop(guard);

        assert_eq!(store.pop_callback().await.unwrap().id, job.id);
    }

    #[tokio::test]
    async fn test_leases_are_per_queue() {
        let (store, _temp) = create_test_store();
        let download = create_test_job("download");
        let callback = create_test_job("callback");
        for job in [&download, &callback] {
            store.save_job(job).await.unwrap();
        }
        store.queue_pending_download(&download).await.unwrap();
        store.queue_pending_callback(&callback).await.unwrap();

        let guard = store.leases.get(Queue::Downloads).lock().unwrap();
        assert!(matches!(
            store.pop_download().await,
            Err(StoreError::RetryLater)
        ));
        assert_eq!(store.pop_callback().await.unwrap().id, callback.id);
        drop(guard);

        assert_eq!(store.pop_download().await.unwrap().id, download.id);
    }

    #[tokio::test]
    async fn test_pop_missing_record() {
        let (store, _temp) = create_test_store();
        let job = create_test_job("ghost");
        store.queue_pending_callback(&job).await.unwrap();

        assert!(matches!(
            store.pop_callback().await,
            Err(StoreError::JobNotFound(_))
        ));
        assert_eq!(store.queue_len(Queue::Callbacks).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scan_pages_through_all_keys() {
        let (store, _temp) = create_test_store();
        let mut expected = Vec::new();
        for i in 0..7 {
            let job = create_test_job(&format!("aggr-{i}"));
            store.save_job(&job).await.unwrap();
            expected.push(encode_job_key(&job.id));
        }
        expected.sort();

        let mut seen = Vec::new();
        let mut cursor = ScanCursor::start();
        let mut rounds = 0;
        loop {
            let (keys, next) = store.scan_keys(cursor, JOB_KEY_PREFIX, 3).await.unwrap();
            assert!(keys.len() <= 3);
            seen.extend(keys);
            rounds += 1;
            if next.is_start() {
                break;
            }
            cursor = next;
        }

        assert_eq!(seen, expected);
        assert_eq!(rounds, 3);
    }

    #[tokio::test]
    async fn test_scan_terminates_with_concurrent_inserts() {
        let (store, _temp) = create_test_store();
        for i in 0..4 {
            store.save_job(&create_test_job(&format!("a{i}"))).await.unwrap();
        }

        let mut cursor = ScanCursor::start();
        let mut rounds = 0;
        loop {
            let (_, next) = store.scan_keys(cursor, JOB_KEY_PREFIX, 2).await.unwrap();
            // keys keep arriving while the scan is in flight
            store.save_job(&create_test_job("late")).await.unwrap();
            rounds += 1;
            assert!(rounds < 50, "scan did not terminate");
            if next.is_start() {
                break;
            }
            cursor = next;
        }
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let first = create_test_job("first");
        let second = create_test_job("second");

        runtime.block_on(async {
            let store = FjallJobStore::open(&path).unwrap();
            store.save_job(&first).await.unwrap();
            store.queue_pending_callback(&first).await.unwrap();
            store.persist().unwrap();
        });

        runtime.block_on(async {
            let store = FjallJobStore::open(&path).unwrap();
            assert_eq!(store.seq_counter.load(Ordering::SeqCst), 1);
            store.save_job(&second).await.unwrap();
            store.queue_pending_callback(&second).await.unwrap();

            assert_eq!(store.pop_callback().await.unwrap().id, first.id);
            assert_eq!(store.pop_callback().await.unwrap().id, second.id);
        });
    }

    #[test]
    fn test_sequence_resumes_after_stale_counter() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let queued: Vec<Job> = (0..3).map(|i| create_test_job(&format!("q{i}"))).collect();
        let late = create_test_job("late");

        runtime.block_on(async {
            let store = FjallJobStore::open(&path).unwrap();
            for job in &queued {
                store.save_job(job).await.unwrap();
                store.queue_pending_callback(job).await.unwrap();
            }
            // counter persisted behind the entries already written
            store
                .metadata
                .insert(META_NEXT_SEQ, 1u64.to_be_bytes().to_vec())
                .unwrap();
            store.persist().unwrap();
        });

        runtime.block_on(async {
            let store = FjallJobStore::open(&path).unwrap();
            assert_eq!(store.seq_counter.load(Ordering::SeqCst), 3);

            store.save_job(&late).await.unwrap();
            store.queue_pending_callback(&late).await.unwrap();
            assert_eq!(store.queue_len(Queue::Callbacks).unwrap(), 4);

            for job in queued.iter().chain([&late]) {
                assert_eq!(store.pop_callback().await.unwrap().id, job.id);
            }
        });
    }

    #[test]
    fn test_malformed_sequence_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs");

        {
            let store = FjallJobStore::open(&path).unwrap();
            store.metadata.insert(META_NEXT_SEQ, vec![1u8, 2, 3]).unwrap();
            store.persist().unwrap();
        }

        assert!(matches!(
            FjallJobStore::open(&path),
            Err(StoreError::Corrupted(_))
        ));
    }
}

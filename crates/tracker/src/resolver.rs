//! Result retrieval for terminal jobs.
//!
//! A completed job's payload is fetched from the queue at most once and
//! cached on its record.  Concurrent callers for the same id share one
//! fetch through a per-id lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use genq_core::job_status::JobStatus;
use genq_core::types::RequestId;
use genq_queue::client::QueueClient;
use tokio::sync::Mutex;

use crate::error::{TrackerError, TrackerResult};
use crate::record::{JobError, JobErrorKind, JobRecord};
use crate::store::JobStore;

pub struct ResultResolver {
    store: Arc<JobStore>,
    client: Arc<dyn QueueClient>,
    /// Per-id fetch locks, present only while a caller holds a lease.
    fetch_locks: SyncMutex<HashMap<RequestId, Arc<Mutex<()>>>>,
}

impl ResultResolver {
    pub fn new(store: Arc<JobStore>, client: Arc<dyn QueueClient>) -> Self {
        Self {
            store,
            client,
            fetch_locks: SyncMutex::new(HashMap::new()),
        }
    }

    /// Return the result of a terminal job.
    ///
    /// - `Completed` with a cached payload: returned without a network call.
    /// - `Completed` without one: fetched, cached, returned.
    /// - `Failed`: the stored error, without a network call.
    /// - anything else: `NotReady`.
    pub async fn get_result(&self, id: &str) -> TrackerResult<serde_json::Value> {
        let record = self.store.get(id).await?;
        if let Some(payload) = Self::settled(record)? {
            return Ok(payload);
        }

        let lease = self.lease_fetch_lock(id);
        let _guard = lease.lock.lock().await;
        self.fetch_once(id).await
    }

    /// Re-read under the fetch lock so a fetch that finished while we
    /// waited is reused instead of repeated.
    async fn fetch_once(&self, id: &str) -> TrackerResult<serde_json::Value> {
        let record = self.store.get(id).await?;
        let model = record.model.clone();
        if let Some(payload) = Self::settled(record)? {
            return Ok(payload);
        }

        tracing::debug!(request_id = %id, model = %model, "Fetching result from queue");
        let payload = self
            .client
            .fetch_result(&model, id)
            .await
            .map_err(|e| TrackerError::queue(id, e))?;

        self.store
            .update(id, |r| r.store_result(payload.clone()).map_err(Into::into))
            .await?;

        tracing::info!(request_id = %id, "Result fetched and cached");
        Ok(payload)
    }

    /// `Some(payload)` when the answer is already known, `None` when a
    /// fetch is needed, `Err` for failed or unfinished jobs.
    fn settled(record: JobRecord) -> TrackerResult<Option<serde_json::Value>> {
        match record.status {
            JobStatus::Completed => Ok(record.result),
            JobStatus::Failed => Err(TrackerError::JobFailed {
                error: record.error.unwrap_or_else(|| {
                    JobError::new(JobErrorKind::Remote, "Failed without a recorded error")
                }),
                request_id: record.id,
            }),
            status => Err(TrackerError::NotReady {
                request_id: record.id,
                status,
            }),
        }
    }

    fn lease_fetch_lock(&self, id: &str) -> FetchLockLease<'_> {
        let mut locks = self.fetch_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(id.to_string()).or_default());
        FetchLockLease {
            locks: &self.fetch_locks,
            id: id.to_string(),
            lock,
        }
    }

    /// Number of ids with a live fetch lock.
    pub fn fetch_lock_count(&self) -> usize {
        self.fetch_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A caller's share of one id's fetch lock.
///
/// Dropping the last lease removes the map entry, including when the
/// caller's future is dropped mid-fetch.
struct FetchLockLease<'a> {
    locks: &'a SyncMutex<HashMap<RequestId, Arc<Mutex<()>>>>,
    id: RequestId,
    lock: Arc<Mutex<()>>,
}

impl Drop for FetchLockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let is_current = locks
            .get(&self.id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock));
        // One reference in the map, one held by this lease.
        if is_current && Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.id);
        }
    }
}

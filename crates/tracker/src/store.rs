//! In-memory job record store.
//!
//! [`JobStore`] is the single owner of every [`JobRecord`].  Other
//! components read cloned snapshots and mutate only through
//! [`JobStore::update`], which applies the mutation to a working copy
//! under the write lock and commits it only if the mutation succeeds.
//! Readers therefore never observe a half-applied record.
//!
//! Removed ids are remembered so they cannot be tracked again.  When a
//! retention window is configured, that memory is dropped one window
//! after removal so the store stays bounded.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use genq_core::error::CoreError;
use genq_core::job_status::JobStatus;
use genq_core::types::RequestId;
use tokio::sync::{broadcast, RwLock};

use crate::error::{TrackerError, TrackerResult};
use crate::events::TrackerEvent;
use crate::record::JobRecord;

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    records: HashMap<RequestId, JobRecord>,
    /// Ids that were removed and must not be reused, with removal time.
    tombstones: HashMap<RequestId, DateTime<Utc>>,
}

/// Authoritative store of tracked jobs.
///
/// Designed to be wrapped in `Arc` and shared by the submission
/// coordinator, poller and result resolver.
pub struct JobStore {
    inner: RwLock<Inner>,
    event_tx: broadcast::Sender<TrackerEvent>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            event_tx,
        }
    }

    /// Subscribe to lifecycle events of all records.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_tx.subscribe()
    }

    /// Start tracking a request the queue just accepted.
    ///
    /// Fails with `Conflict` if the id is already tracked or was
    /// tracked and removed before.
    pub async fn create(
        &self,
        id: RequestId,
        model: String,
        metadata: Option<serde_json::Value>,
    ) -> TrackerResult<JobRecord> {
        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&id) || inner.tombstones.contains_key(&id) {
            return Err(CoreError::Conflict(format!("Request id {id} is already in use")).into());
        }

        let record = JobRecord::new(id.clone(), model.clone(), metadata);
        inner.records.insert(id.clone(), record.clone());
        drop(inner);

        self.publish(TrackerEvent::Submitted {
            request_id: id,
            model,
        });
        Ok(record)
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: &str) -> TrackerResult<JobRecord> {
        self.inner
            .read()
            .await
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Atomically mutate one record.
    ///
    /// `mutation` runs against a copy; the copy replaces the stored
    /// record only when `mutation` returns `Ok`. Returns the committed
    /// snapshot.
    pub async fn update<F>(&self, id: &str, mutation: F) -> TrackerResult<JobRecord>
    where
        F: FnOnce(&mut JobRecord) -> TrackerResult<()>,
    {
        let mut inner = self.inner.write().await;
        let current = inner.records.get(id).ok_or_else(|| not_found(id))?;

        let mut working = current.clone();
        mutation(&mut working)?;

        if working.poll_attempts < current.poll_attempts {
            return Err(CoreError::Conflict(format!(
                "Poll attempts of {id} cannot decrease"
            ))
            .into());
        }

        let from = current.status;
        let result_stored = current.result.is_none() && working.result.is_some();
        inner.records.insert(id.to_string(), working.clone());
        drop(inner);

        if from != working.status {
            self.publish(TrackerEvent::StatusChanged {
                request_id: id.to_string(),
                from,
                to: working.status,
            });
        }
        if result_stored {
            self.publish(TrackerEvent::ResultStored {
                request_id: id.to_string(),
            });
        }
        Ok(working)
    }

    /// Stop tracking a request. The id stays invalid until its tombstone
    /// expires in [`purge_terminal_older_than`](Self::purge_terminal_older_than).
    ///
    /// Returns the final snapshot with status `Removed`.
    pub async fn remove(&self, id: &str) -> TrackerResult<JobRecord> {
        let mut inner = self.inner.write().await;
        let mut record = inner.records.remove(id).ok_or_else(|| not_found(id))?;
        inner.tombstones.insert(id.to_string(), Utc::now());
        drop(inner);

        record.status = JobStatus::Removed;
        self.publish(TrackerEvent::Removed {
            request_id: id.to_string(),
        });
        Ok(record)
    }

    /// Point-in-time snapshot of every non-terminal record.
    pub async fn list_pending(&self) -> Vec<JobRecord> {
        self.inner
            .read()
            .await
            .records
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect()
    }

    /// Number of records currently tracked.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of removed ids still blocked from reuse.
    pub async fn tombstone_count(&self) -> usize {
        self.inner.read().await.tombstones.len()
    }

    /// Remove terminal records that finished more than `retention` ago,
    /// and forget ids removed more than `retention` ago.
    ///
    /// Returns the ids of the records that were purged.
    pub async fn purge_terminal_older_than(&self, retention: Duration) -> Vec<RequestId> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut inner = self.inner.write().await;
        inner.tombstones.retain(|_, removed_at| *removed_at > cutoff);
        let expired: Vec<RequestId> = inner
            .records
            .values()
            .filter(|r| r.is_terminal())
            .filter(|r| r.completed_at.is_some_and(|at| at <= cutoff))
            .map(|r| r.id.clone())
            .collect();

        let now = Utc::now();
        for id in &expired {
            inner.records.remove(id);
            inner.tombstones.insert(id.clone(), now);
        }
        drop(inner);

        for id in &expired {
            self.publish(TrackerEvent::Removed {
                request_id: id.clone(),
            });
        }
        expired
    }

    fn publish(&self, event: TrackerEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.event_tx.send(event);
    }
}

fn not_found(id: &str) -> TrackerError {
    CoreError::NotFound {
        entity: "job record",
        id: id.to_string(),
    }
    .into()
}

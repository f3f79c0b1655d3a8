//! Pipeline-facing entry point.
//!
//! [`JobTracker`] wires the store, submission coordinator, poller and
//! result resolver together around one [`QueueClient`].  Create it once
//! at process start, share it as `Arc<JobTracker>`, and call
//! [`JobTracker::shutdown`] before exit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use genq_core::job_status::JobStatus;
use genq_core::types::RequestId;
use genq_queue::client::{GenerationRequest, QueueClient};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::batch::StatusMultiplexer;
use crate::config::{PollOptions, TrackerConfig};
use crate::coordinator::SubmissionCoordinator;
use crate::error::{TrackerError, TrackerResult};
use crate::events::TrackerEvent;
use crate::poller::{Poller, StatusOutcomes};
use crate::record::JobRecord;
use crate::resolver::ResultResolver;
use crate::store::JobStore;

/// How long `shutdown` waits for the background sweep to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct JobTracker {
    store: Arc<JobStore>,
    coordinator: SubmissionCoordinator,
    poller: Arc<Poller>,
    resolver: Arc<ResultResolver>,
    config: TrackerConfig,
    cancel: CancellationToken,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl JobTracker {
    /// Build a tracker around `client`.
    ///
    /// Requests without an explicit model are sent to `default_model`.
    /// The background sweep is not running until [`start`](Self::start).
    pub fn new(
        client: Arc<dyn QueueClient>,
        default_model: impl Into<String>,
        config: TrackerConfig,
    ) -> Self {
        let store = Arc::new(JobStore::new());
        let multiplexer = Arc::new(StatusMultiplexer::new(
            Arc::clone(&client),
            config.batch_concurrency,
        ));
        let resolver = Arc::new(ResultResolver::new(Arc::clone(&store), Arc::clone(&client)));
        let poller = Arc::new(Poller::new(
            Arc::clone(&store),
            multiplexer,
            Arc::clone(&resolver),
            config.clone(),
        ));
        let coordinator =
            SubmissionCoordinator::new(client, Arc::clone(&store), default_model.into());

        Self {
            store,
            coordinator,
            poller,
            resolver,
            config,
            cancel: CancellationToken::new(),
            background: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn default_model(&self) -> &str {
        self.coordinator.default_model()
    }

    /// Spawn the background sweep. Calling it again while the sweep is
    /// running has no effect.
    pub async fn start(&self) {
        let mut background = self.background.lock().await;
        if background.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let poller = Arc::clone(&self.poller);
        let cancel = self.cancel.child_token();
        *background = Some(tokio::spawn(async move {
            poller.run(cancel).await;
        }));
    }

    /// Stop the background sweep and wait briefly for it to exit.
    ///
    /// Callers still waiting in `poll_for_result` are not interrupted;
    /// they keep polling on their own schedule.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job tracker");
        self.cancel.cancel();

        if let Some(handle) = self.background.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Job poller did not stop in time");
            }
        }

        tracing::info!(
            tracked = self.store.len().await,
            "Job tracker shut down complete"
        );
    }

    /// Subscribe to lifecycle events of every tracked job.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.store.subscribe()
    }

    // ---- submission ----

    pub async fn submit_to_queue(&self, request: &GenerationRequest) -> TrackerResult<RequestId> {
        self.coordinator.submit_to_queue(request).await
    }

    pub async fn submit_to_queue_with_tracking(
        &self,
        request: &GenerationRequest,
        metadata: serde_json::Value,
    ) -> TrackerResult<RequestId> {
        self.coordinator
            .submit_to_queue_with_tracking(request, metadata)
            .await
    }

    // ---- status ----

    /// Check one job against the queue now and return its status.
    ///
    /// A terminal job answers from the store.
    pub async fn check_queue_status(&self, id: &str) -> TrackerResult<JobStatus> {
        self.poller
            .observe(&[id.to_string()])
            .await
            .remove(id)
            .unwrap_or_else(|| Err(TrackerError::NotFound(id.to_string())))
    }

    /// Check many jobs in one call, with one outcome per distinct id.
    pub async fn batch_check_status(&self, ids: &[RequestId]) -> StatusOutcomes {
        self.poller.observe(ids).await
    }

    // ---- results ----

    /// Result of a terminal job, fetched from the queue at most once.
    pub async fn get_queue_result(&self, id: &str) -> TrackerResult<serde_json::Value> {
        self.resolver.get_result(id).await
    }

    /// Wait for the job to finish and return its result.
    ///
    /// `None` uses the configured default options.
    pub async fn poll_for_result(
        &self,
        id: &str,
        options: Option<PollOptions>,
    ) -> TrackerResult<serde_json::Value> {
        let options = options.unwrap_or_else(|| self.config.poll.clone());
        self.poller.poll_for_result(id, &options).await
    }

    /// [`poll_for_result`](Self::poll_for_result) with a caller-owned
    /// cancellation token.
    pub async fn poll_for_result_with_cancel(
        &self,
        id: &str,
        options: Option<PollOptions>,
        cancel: &CancellationToken,
    ) -> TrackerResult<serde_json::Value> {
        let options = options.unwrap_or_else(|| self.config.poll.clone());
        self.poller
            .poll_for_result_with_cancel(id, &options, cancel)
            .await
    }

    // ---- records ----

    pub async fn get_request(&self, id: &str) -> TrackerResult<JobRecord> {
        self.store.get(id).await
    }

    /// Administrative status override.
    ///
    /// The job state machine still applies. `Removed` is the same as
    /// [`remove_request`](Self::remove_request).
    pub async fn update_request_status(
        &self,
        id: &str,
        status: JobStatus,
    ) -> TrackerResult<JobRecord> {
        if status == JobStatus::Removed {
            return self.remove_request(id).await;
        }

        let record = self
            .store
            .update(id, |r| r.transition(status, Utc::now()).map_err(Into::into))
            .await?;
        tracing::info!(request_id = %id, status = %record.status, "Job status overridden");
        Ok(record)
    }

    /// Stop tracking a job. Its id is never valid again.
    pub async fn remove_request(&self, id: &str) -> TrackerResult<JobRecord> {
        let record = self.store.remove(id).await?;
        tracing::info!(request_id = %id, "Job removed");
        Ok(record)
    }

    /// Number of records currently tracked.
    pub async fn tracked_count(&self) -> usize {
        self.store.len().await
    }
}

impl Drop for JobTracker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

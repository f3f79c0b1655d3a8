//! Status polling and the job state machine driver.
//!
//! The [`Poller`] advances records from queue observations.  It serves
//! two kinds of work, both funnelled through the shared
//! [`StatusMultiplexer`]:
//!
//! - [`Poller::poll_for_result`]: one caller waiting on one job, with
//!   exponential backoff between checks and a wait budget.
//! - [`Poller::run`]: a background sweep that checks every pending job
//!   whose backoff delay has elapsed, even if nobody is waiting on it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use genq_core::job_status::JobStatus;
use genq_core::types::RequestId;
use genq_queue::error::QueueResult;
use genq_queue::messages::StatusReport;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backoff::{delay_for_attempt, next_delay, with_jitter};
use crate::batch::{StatusMultiplexer, StatusTarget};
use crate::config::{PollOptions, TrackerConfig};
use crate::error::{TrackerError, TrackerResult};
use crate::events::TrackerEvent;
use crate::record::{JobError, JobErrorKind, JobRecord};
use crate::resolver::ResultResolver;
use crate::store::JobStore;

/// Per-id outcome of one observation round.
pub type StatusOutcomes = HashMap<RequestId, TrackerResult<JobStatus>>;

pub struct Poller {
    store: Arc<JobStore>,
    multiplexer: Arc<StatusMultiplexer>,
    resolver: Arc<ResultResolver>,
    config: TrackerConfig,
    /// Earliest time the sweep checks each pending job again.
    schedule: Mutex<HashMap<RequestId, Instant>>,
}

impl Poller {
    pub fn new(
        store: Arc<JobStore>,
        multiplexer: Arc<StatusMultiplexer>,
        resolver: Arc<ResultResolver>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            multiplexer,
            resolver,
            config,
            schedule: Mutex::new(HashMap::new()),
        }
    }

    /// Check the given jobs once and apply what the queue reports.
    ///
    /// Terminal jobs answer from the store without a network call;
    /// unknown ids answer `NotFound`.  A transport failure for one id is
    /// reported for that id only.  Duplicate ids are checked once.
    pub async fn observe(&self, ids: &[RequestId]) -> StatusOutcomes {
        let mut outcomes = StatusOutcomes::new();
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match self.store.get(id).await {
                Ok(record) if record.is_terminal() => {
                    outcomes.insert(id.clone(), Ok(record.status));
                }
                Ok(record) => targets.push(StatusTarget {
                    request_id: record.id,
                    model: record.model,
                }),
                Err(e) => {
                    outcomes.insert(id.clone(), Err(e));
                }
            }
        }

        for (target, report) in self.multiplexer.check_all(targets).await {
            let outcome = self.apply(&target.request_id, report).await;
            outcomes.insert(target.request_id, outcome);
        }
        outcomes
    }

    /// Apply one status check result to the stored record.
    async fn apply(&self, id: &str, report: QueueResult<StatusReport>) -> TrackerResult<JobStatus> {
        let now = Utc::now();
        let threshold = self.config.max_consecutive_failures;

        match report {
            Ok(report) => {
                let record = self
                    .store
                    .update(id, |r| {
                        // Another observer may have finished the job since
                        // the check was issued; a stale report is dropped.
                        if r.is_terminal() {
                            return Ok(());
                        }
                        r.apply_report(&report, now).map_err(Into::into)
                    })
                    .await?;
                tracing::debug!(
                    request_id = %id,
                    status = %record.status,
                    attempts = record.poll_attempts,
                    "Status observed",
                );
                Ok(record.status)
            }
            Err(err) => {
                let record = self
                    .store
                    .update(id, |r| {
                        if r.is_terminal() {
                            return Ok(());
                        }
                        r.record_check_failure(&err, threshold, now)
                            .map_err(Into::into)
                    })
                    .await?;

                if record.status == JobStatus::Failed {
                    tracing::error!(
                        request_id = %id,
                        error = %err,
                        attempts = record.poll_attempts,
                        "Job marked failed after status check",
                    );
                    Ok(JobStatus::Failed)
                } else if record.is_terminal() {
                    Ok(record.status)
                } else {
                    Err(TrackerError::queue(id, err))
                }
            }
        }
    }

    /// Wait until the job is terminal or the wait budget runs out.
    pub async fn poll_for_result(
        &self,
        id: &str,
        options: &PollOptions,
    ) -> TrackerResult<serde_json::Value> {
        self.poll_for_result_with_cancel(id, options, &CancellationToken::new())
            .await
    }

    /// Like [`poll_for_result`](Self::poll_for_result), but the wait also
    /// ends when `cancel` fires.
    ///
    /// Timeout and cancellation only detach this caller: the record is
    /// left as it is and keeps being updated by other observers.
    pub async fn poll_for_result_with_cancel(
        &self,
        id: &str,
        options: &PollOptions,
        cancel: &CancellationToken,
    ) -> TrackerResult<serde_json::Value> {
        options.validate().map_err(TrackerError::Validation)?;

        let started = Instant::now();
        // `None` when the budget reaches past the clock's range: wait unbounded.
        let deadline = started.checked_add(options.timeout);
        let mut events = self.store.subscribe();
        let mut delay = options.min_interval;
        let mut attempt = 0u32;

        loop {
            let record = self.store.get(id).await?;
            if record.is_terminal() {
                return self.finish(record).await;
            }

            attempt += 1;
            if let Some(Err(e)) = self.observe(&[id.to_string()]).await.remove(id) {
                if !e.is_retryable() {
                    return Err(e);
                }
                tracing::warn!(request_id = %id, attempt, error = %e, "Status check failed, will retry");
            }

            let record = self.store.get(id).await?;
            if record.is_terminal() {
                return self.finish(record).await;
            }

            let mut sleep_for = with_jitter(delay, options.jitter);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Self::timeout(id, started));
                }
                sleep_for = sleep_for.min(deadline - now);
            }
            tracing::debug!(
                request_id = %id,
                attempt,
                status = %record.status,
                delay_ms = sleep_for.as_millis() as u64,
                "Job still pending, backing off",
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(request_id = %id, "Wait cancelled by caller");
                    return Err(TrackerError::Cancelled(id.to_string()));
                }
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wait_for_terminal_event(&mut events, id) => {}
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let record = self.store.get(id).await?;
                if record.is_terminal() {
                    return self.finish(record).await;
                }
                return Err(Self::timeout(id, started));
            }

            delay = next_delay(delay, options);
        }
    }

    /// Resolve once `id` is terminal or gone, as announced by an event.
    ///
    /// A lagged receiver may have missed that event, so lag is answered
    /// from the store; a job still pending keeps the caller waiting.
    async fn wait_for_terminal_event(
        &self,
        events: &mut broadcast::Receiver<TrackerEvent>,
        id: &str,
    ) {
        loop {
            match events.recv().await {
                Ok(event) if event.request_id() == id && event.is_terminal() => return,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(request_id = %id, skipped, "Event receiver lagged");
                    match self.store.get(id).await {
                        Ok(record) if !record.is_terminal() => {}
                        _ => return,
                    }
                }
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }

    /// Run the background sweep until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            max_concurrency = self.multiplexer.max_concurrency(),
            "Job poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One sweep: check due pending jobs in a single batch, fetch results
    /// of jobs that completed, and expire old terminal records.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let pending = self.store.list_pending().await;
        let due: Vec<RequestId> = {
            let mut schedule = self.schedule.lock().await;
            let pending_ids: HashSet<&str> = pending.iter().map(|r| r.id.as_str()).collect();
            schedule.retain(|id, _| pending_ids.contains(id.as_str()));
            pending
                .iter()
                .filter(|r| schedule.get(&r.id).map_or(true, |at| now >= *at))
                .map(|r| r.id.clone())
                .collect()
        };

        if !due.is_empty() {
            let outcomes = self.observe(&due).await;
            for (id, outcome) in outcomes {
                match outcome {
                    Ok(JobStatus::Completed) => {
                        if let Err(e) = self.resolver.get_result(&id).await {
                            tracing::warn!(request_id = %id, error = %e, "Failed to fetch result");
                        }
                    }
                    Ok(status) if status.is_terminal() => {}
                    Ok(_) | Err(TrackerError::Queue { .. }) => {
                        self.reschedule(&id, now).await;
                    }
                    Err(TrackerError::NotFound(_)) => {
                        // Removed between listing and checking.
                    }
                    Err(e) => {
                        tracing::debug!(request_id = %id, error = %e, "Sweep check failed");
                    }
                }
            }
        }

        if let Some(retention) = self.config.retention {
            let purged = self.store.purge_terminal_older_than(retention).await;
            if !purged.is_empty() {
                tracing::info!(count = purged.len(), "Expired terminal job records");
            }
        }
    }

    /// Push a pending job's next sweep check out by its backoff delay.
    async fn reschedule(&self, id: &str, checked_at: Instant) {
        let Ok(record) = self.store.get(id).await else {
            return;
        };
        let delay = delay_for_attempt(record.poll_attempts, &self.config.poll);
        self.schedule
            .lock()
            .await
            .insert(record.id, checked_at + delay);
    }

    async fn finish(&self, record: JobRecord) -> TrackerResult<serde_json::Value> {
        match record.status {
            JobStatus::Failed => Err(TrackerError::JobFailed {
                error: record.error.unwrap_or_else(|| {
                    JobError::new(JobErrorKind::Remote, "Failed without a recorded error")
                }),
                request_id: record.id,
            }),
            _ => self.resolver.get_result(&record.id).await,
        }
    }

    fn timeout(id: &str, started: Instant) -> TrackerError {
        let waited = started.elapsed();
        tracing::info!(
            request_id = %id,
            waited_ms = waited.as_millis() as u64,
            "Stopped waiting for job",
        );
        TrackerError::PollTimeout {
            request_id: id.to_string(),
            waited,
        }
    }
}

//! The tracked state of one generation request.
//!
//! Records are owned by the [`JobStore`](crate::store::JobStore); the
//! mutators here are only reachable through its atomic update, so every
//! change is validated against the job state machine before it is
//! committed.

use std::fmt;

use chrono::Utc;
use genq_core::error::CoreError;
use genq_core::job_status::JobStatus;
use genq_core::types::{RequestId, Timestamp};
use genq_queue::error::QueueError;
use genq_queue::messages::{RemoteState, StatusReport};
use serde::{Deserialize, Serialize};

/// Why a job ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The queue reported the generation as failed.
    Remote,
    /// The queue no longer recognizes the request id.
    NotFound,
    /// Too many status checks in a row failed in transport.
    Transport,
    /// Set by an administrative status override.
    Manual,
}

/// Structured failure description stored on a `Failed` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            JobErrorKind::Remote => "remote failure",
            JobErrorKind::NotFound => "not found on queue",
            JobErrorKind::Transport => "transport failure",
            JobErrorKind::Manual => "manually failed",
        };
        write!(f, "{kind}: {}", self.message)
    }
}

/// One tracked generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Identifier issued by the queue. Never changes.
    pub id: RequestId,
    /// Model the request was submitted to.
    pub model: String,
    pub status: JobStatus,
    pub submitted_at: Timestamp,
    pub last_checked_at: Option<Timestamp>,
    /// Set on entering `Completed` or `Failed`.
    pub completed_at: Option<Timestamp>,
    /// Status checks performed so far, successful or not.
    pub poll_attempts: u32,
    /// Failed status checks since the last successful one.
    pub consecutive_failures: u32,
    pub queue_position: Option<u32>,
    pub progress: Option<f32>,
    /// Result payload; only ever set on a `Completed` record.
    pub result: Option<serde_json::Value>,
    /// Failure description; only ever set on a `Failed` record.
    pub error: Option<JobError>,
    /// Caller context, round-tripped unchanged.
    pub metadata: Option<serde_json::Value>,
}

impl JobRecord {
    pub(crate) fn new(
        id: RequestId,
        model: String,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            model,
            status: JobStatus::Submitted,
            submitted_at: Utc::now(),
            last_checked_at: None,
            completed_at: None,
            poll_attempts: 0,
            consecutive_failures: 0,
            queue_position: None,
            progress: None,
            result: None,
            error: None,
            metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply one successful status observation.
    ///
    /// A `queued` report leaves the state where it is, so a job already
    /// seen running never moves back to `Submitted`.
    pub(crate) fn apply_report(
        &mut self,
        report: &StatusReport,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        let next = match report.effective_state() {
            RemoteState::Queued => self.status,
            RemoteState::Running => JobStatus::InProgress,
            RemoteState::Completed => JobStatus::Completed,
            RemoteState::Failed => JobStatus::Failed,
        };
        self.status.validate_transition(next)?;

        self.poll_attempts += 1;
        self.consecutive_failures = 0;
        self.last_checked_at = Some(now);
        self.queue_position = report.queue_position;
        self.progress = report.progress;

        if next == JobStatus::Failed {
            let message = report
                .error
                .clone()
                .unwrap_or_else(|| "Generation failed without an error message".to_string());
            self.error = Some(JobError::new(JobErrorKind::Remote, message));
        }
        self.enter(next, now);
        Ok(())
    }

    /// Record a status check that did not produce a report.
    ///
    /// `NotFound` fails the job at once. Any other error counts towards
    /// `max_consecutive_failures`; reaching it fails the job with a
    /// transport cause.
    pub(crate) fn record_check_failure(
        &mut self,
        err: &QueueError,
        max_consecutive_failures: u32,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        self.status.validate_transition(JobStatus::Failed)?;

        self.poll_attempts += 1;
        self.last_checked_at = Some(now);

        if let QueueError::NotFound(_) = err {
            self.error = Some(JobError::new(JobErrorKind::NotFound, err.to_string()));
            self.enter(JobStatus::Failed, now);
            return Ok(());
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= max_consecutive_failures {
            self.error = Some(JobError::new(
                JobErrorKind::Transport,
                format!(
                    "{} consecutive status checks failed, last error: {err}",
                    self.consecutive_failures
                ),
            ));
            self.enter(JobStatus::Failed, now);
        }
        Ok(())
    }

    /// Move to `next` without a queue observation (administrative use).
    pub(crate) fn transition(&mut self, next: JobStatus, now: Timestamp) -> Result<(), CoreError> {
        self.status.validate_transition(next)?;
        if next == JobStatus::Removed {
            return Err(CoreError::Conflict(
                "Removal goes through the store, not a status update".to_string(),
            ));
        }
        if next == JobStatus::Failed {
            self.error = Some(JobError::new(
                JobErrorKind::Manual,
                "Status set to failed by an administrative override",
            ));
        }
        self.enter(next, now);
        Ok(())
    }

    /// Cache the fetched result payload.
    pub(crate) fn store_result(&mut self, payload: serde_json::Value) -> Result<(), CoreError> {
        if self.status != JobStatus::Completed {
            return Err(CoreError::Conflict(format!(
                "Cannot store a result on a {} job",
                self.status
            )));
        }
        self.result = Some(payload);
        Ok(())
    }

    fn enter(&mut self, next: JobStatus, now: Timestamp) {
        if next.is_terminal() && !self.status.is_terminal() {
            self.completed_at = Some(now);
            self.queue_position = None;
        }
        self.status = next;
    }
}

//! Tracker error types.

use std::time::Duration;

use genq_core::error::CoreError;
use genq_core::job_status::JobStatus;
use genq_core::types::RequestId;
use genq_queue::error::QueueError;

use crate::record::JobError;

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Errors surfaced to pipeline callers.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The request was rejected before any network call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The queue refused or never received the submission. No record
    /// was created; the caller decides whether to resubmit.
    #[error("Submission to {model} failed: {source}")]
    Submit {
        model: String,
        #[source]
        source: QueueError,
    },

    /// A queue call for a tracked request failed.
    #[error("Queue call for request {request_id} failed: {source}")]
    Queue {
        request_id: RequestId,
        #[source]
        source: QueueError,
    },

    /// The id is unknown or was removed.
    #[error("Request {0} not found")]
    NotFound(RequestId),

    /// A result was requested before the job reached a terminal state.
    #[error("Request {request_id} is not ready (status: {status})")]
    NotReady {
        request_id: RequestId,
        status: JobStatus,
    },

    /// The caller's wait budget ran out. The job itself is unaffected.
    #[error("Stopped waiting for request {request_id} after {waited:?}")]
    PollTimeout {
        request_id: RequestId,
        waited: Duration,
    },

    /// The caller cancelled its wait. The job itself is unaffected.
    #[error("Wait for request {0} was cancelled")]
    Cancelled(RequestId),

    /// The job reached `Failed`.
    #[error("Request {request_id} failed: {error}")]
    JobFailed {
        request_id: RequestId,
        error: JobError,
    },

    /// The operation contradicts the job state machine or id uniqueness.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl TrackerError {
    /// Attach a request id to a queue error.
    pub fn queue(request_id: impl Into<RequestId>, source: QueueError) -> Self {
        TrackerError::Queue {
            request_id: request_id.into(),
            source,
        }
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackerError::Submit { source, .. } | TrackerError::Queue { source, .. } => {
                source.is_transport()
            }
            _ => false,
        }
    }
}

impl From<CoreError> for TrackerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound { id, .. } => TrackerError::NotFound(id),
            CoreError::Validation(msg) => TrackerError::Validation(msg),
            CoreError::Conflict(msg) => TrackerError::Conflict(msg),
        }
    }
}

//! Job lifecycle state machine.
//!
//! A tracked generation request moves through these states:
//!
//! ```text
//! Submitted  --running-->  InProgress
//! Submitted  --done----->  Completed
//! Submitted  --error---->  Failed
//! InProgress --running-->  InProgress
//! InProgress --done----->  Completed
//! InProgress --error---->  Failed
//! (non-terminal) --remove--> Removed
//! ```
//!
//! `Completed`, `Failed` and `Removed` are terminal: no transition out of
//! them is accepted.  Deleting a finished record is not a transition; the
//! store allows it from any state and reports the record as `Removed`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by the external queue, not yet observed running.
    Submitted,
    /// The external queue reported the job as running.
    InProgress,
    /// The external queue reported the job as done.
    Completed,
    /// The job failed remotely, vanished, or could not be observed.
    Failed,
    /// Removed by the caller or by retention expiry.
    Removed,
}

impl JobStatus {
    /// Stable lower-case name used in logs and events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }

    /// Whether no further transitions are accepted from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Removed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// `InProgress -> InProgress` is allowed (a repeated "running"
    /// observation); `Submitted -> Submitted` is allowed for a "queued"
    /// observation that does not move the job.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Submitted, Submitted | InProgress | Completed | Failed | Removed) => true,
            (InProgress, InProgress | Completed | Failed | Removed) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning [`CoreError::Conflict`] when the
    /// edge does not exist.
    pub fn validate_transition(self, next: JobStatus) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Cannot transition job from {self} to {next}"
            )))
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

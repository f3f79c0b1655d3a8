//! Queue API wire types and parser.
//!
//! The queue answers a submission with a request id, and status polls
//! with `{"status": "<STATE>", ...}`. This module deserializes both into
//! strongly-typed structs.

use serde::{Deserialize, Serialize};

/// Response returned by the submit endpoint after the request was queued.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued request.
    pub request_id: String,
    /// Polling URL advertised by the queue, if any.
    #[serde(default)]
    pub status_url: Option<String>,
    /// Result URL advertised by the queue, if any.
    #[serde(default)]
    pub response_url: Option<String>,
}

/// Remote lifecycle state as reported by the queue.
///
/// Both the upper-case queue spelling and plain lower-case names are
/// accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteState {
    #[serde(rename = "IN_QUEUE", alias = "queued")]
    Queued,
    #[serde(rename = "IN_PROGRESS", alias = "running")]
    Running,
    #[serde(rename = "COMPLETED", alias = "completed")]
    Completed,
    #[serde(rename = "FAILED", alias = "failed")]
    Failed,
}

/// One status observation of a queued request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RemoteState,
    /// Position in the queue while waiting.
    #[serde(default)]
    pub queue_position: Option<u32>,
    /// Completion fraction in `0.0..=1.0`, when the model reports it.
    #[serde(default)]
    pub progress: Option<f32>,
    /// Failure description reported alongside the state.
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReport {
    /// Build a report carrying only a state.
    pub fn new(status: RemoteState) -> Self {
        Self {
            status,
            queue_position: None,
            progress: None,
            error: None,
        }
    }

    /// Build a failed report with an error description.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(RemoteState::Failed)
        }
    }

    /// State after accounting for errors reported on a completed request.
    ///
    /// The queue marks a request `COMPLETED` even when the model raised;
    /// the `error` field is then the only signal of failure.
    pub fn effective_state(&self) -> RemoteState {
        match (self.status, &self.error) {
            (RemoteState::Completed, Some(_)) => RemoteState::Failed,
            (state, _) => state,
        }
    }
}

/// Parse a status response body into a typed report.
pub fn parse_status(text: &str) -> Result<StatusReport, serde_json::Error> {
    serde_json::from_str(text)
}

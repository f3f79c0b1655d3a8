//! Lifecycle events published by the job store.
//!
//! Every record creation, status change, result fetch and removal is
//! broadcast so waiting callers (and any other subscriber, such as a
//! pipeline progress display) learn about it without polling the store.

use genq_core::job_status::JobStatus;
use genq_core::types::RequestId;
use serde::Serialize;

/// A lifecycle change of one tracked job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// A request was accepted by the queue and is now tracked.
    Submitted { request_id: RequestId, model: String },

    /// A job moved between states.
    StatusChanged {
        request_id: RequestId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The result payload of a completed job was fetched and cached.
    ResultStored { request_id: RequestId },

    /// The record was removed by a caller or by retention expiry.
    Removed { request_id: RequestId },
}

impl TrackerEvent {
    /// The job this event is about.
    pub fn request_id(&self) -> &str {
        match self {
            TrackerEvent::Submitted { request_id, .. }
            | TrackerEvent::StatusChanged { request_id, .. }
            | TrackerEvent::ResultStored { request_id }
            | TrackerEvent::Removed { request_id } => request_id,
        }
    }

    /// Whether the event means no further status changes will follow.
    pub fn is_terminal(&self) -> bool {
        match self {
            TrackerEvent::StatusChanged { to, .. } => to.is_terminal(),
            TrackerEvent::Removed { .. } => true,
            _ => false,
        }
    }
}

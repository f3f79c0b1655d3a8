//! Asynchronous generation job tracker.
//!
//! Submits long-running generation requests to the external queue,
//! keeps one authoritative [`JobRecord`](record::JobRecord) per request
//! in the [`JobStore`](store::JobStore), polls pending jobs with bounded
//! concurrency and exponential backoff, and hands terminal results back
//! to callers.
//!
//! [`JobTracker`](tracker::JobTracker) is the entry point pipelines use.

pub mod backoff;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod poller;
pub mod record;
pub mod resolver;
pub mod store;
pub mod tracker;

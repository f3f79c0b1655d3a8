//! Generation queue client library.
//!
//! Provides the [`QueueClient`](client::QueueClient) contract used by the
//! job tracker, a reqwest-backed HTTP implementation, typed wire
//! messages, and environment-driven configuration.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;

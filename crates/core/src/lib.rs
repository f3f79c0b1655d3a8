//! Domain types shared by the generation queue crates.
//!
//! Pure logic with no internal workspace dependencies: error type,
//! identifiers, the job lifecycle state machine, and request validation.

pub mod error;
pub mod job_status;
pub mod types;
pub mod validation;

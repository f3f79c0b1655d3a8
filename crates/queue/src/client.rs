//! Queue client contract.
//!
//! [`QueueClient`] is the seam between the job tracker and the external
//! generation service. Implementations hold no mutable state; every call
//! is independent and safe to repeat.

use async_trait::async_trait;
use genq_core::types::RequestId;
use serde::{Deserialize, Serialize};

use crate::error::QueueResult;
use crate::messages::StatusReport;

/// A generation request as handed over by a pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Target model. `None` resolves to the configured default model.
    #[serde(default)]
    pub model: Option<String>,
    /// Model parameters (prompt, image size, duration, ...).
    pub input: serde_json::Value,
}

impl GenerationRequest {
    /// Create a request for the default model.
    pub fn new(input: serde_json::Value) -> Self {
        Self { model: None, input }
    }

    /// Target a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The model this request goes to, falling back to `default_model`.
    pub fn resolved_model<'a>(&'a self, default_model: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default_model)
    }
}

/// Submit / status / result operations against the external queue.
///
/// Status and result calls are routed by model, so both take the model
/// identifier the request was submitted to.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Queue a request. Never retries internally.
    async fn submit(&self, model: &str, input: &serde_json::Value) -> QueueResult<RequestId>;

    /// Observe the current remote state of a request.
    async fn check_status(&self, model: &str, request_id: &str) -> QueueResult<StatusReport>;

    /// Fetch the result payload of a completed request.
    async fn fetch_result(&self, model: &str, request_id: &str)
        -> QueueResult<serde_json::Value>;
}

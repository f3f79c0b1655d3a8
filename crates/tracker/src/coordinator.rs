//! Request submission.
//!
//! [`SubmissionCoordinator`] validates a request, hands it to the queue
//! exactly once, and starts tracking the id the queue returns.  It never
//! retries: a resubmission would create a second billable job, so that
//! decision stays with the caller.

use std::sync::Arc;

use genq_core::types::RequestId;
use genq_core::validation::{validate_input, validate_model_id};
use genq_queue::client::{GenerationRequest, QueueClient};

use crate::error::{TrackerError, TrackerResult};
use crate::store::JobStore;

pub struct SubmissionCoordinator {
    client: Arc<dyn QueueClient>,
    store: Arc<JobStore>,
    default_model: String,
}

impl SubmissionCoordinator {
    pub fn new(client: Arc<dyn QueueClient>, store: Arc<JobStore>, default_model: String) -> Self {
        Self {
            client,
            store,
            default_model,
        }
    }

    /// Model used for requests that do not name one.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Submit a request and start tracking it.
    pub async fn submit_to_queue(&self, request: &GenerationRequest) -> TrackerResult<RequestId> {
        self.submit(request, None).await
    }

    /// Submit a request and attach caller metadata to its record, so the
    /// result can be joined back to the pipeline call that asked for it.
    pub async fn submit_to_queue_with_tracking(
        &self,
        request: &GenerationRequest,
        metadata: serde_json::Value,
    ) -> TrackerResult<RequestId> {
        self.submit(request, Some(metadata)).await
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        metadata: Option<serde_json::Value>,
    ) -> TrackerResult<RequestId> {
        let model = request.resolved_model(&self.default_model);
        validate_model_id(model)?;
        validate_input(&request.input)?;

        let request_id = self
            .client
            .submit(model, &request.input)
            .await
            .map_err(|source| {
                tracing::error!(model, error = %source, "Failed to submit request to queue");
                TrackerError::Submit {
                    model: model.to_string(),
                    source,
                }
            })?;

        self.store
            .create(request_id.clone(), model.to_string(), metadata)
            .await?;

        tracing::info!(request_id = %request_id, model, "Request submitted to queue");
        Ok(request_id)
    }
}

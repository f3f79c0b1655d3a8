//! Bounded-concurrency status checks.
//!
//! [`StatusMultiplexer`] is the single funnel for status calls to the
//! queue.  A batch runs at most `max_concurrency` checks at a time, and a
//! semaphore shared by every batch caps the total in flight, so the call
//! rate stays bounded no matter how many pipelines are waiting.

use std::sync::Arc;

use futures::StreamExt;
use genq_core::types::RequestId;
use genq_queue::client::QueueClient;
use genq_queue::error::{QueueError, QueueResult};
use genq_queue::messages::StatusReport;
use tokio::sync::Semaphore;

/// One request to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTarget {
    pub request_id: RequestId,
    pub model: String,
}

/// Shared status-check worker pool.
pub struct StatusMultiplexer {
    client: Arc<dyn QueueClient>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl StatusMultiplexer {
    /// Create a multiplexer allowing `max_concurrency` checks in flight.
    pub fn new(client: Arc<dyn QueueClient>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Check every target and return one outcome per target.
    ///
    /// Outcomes are independent: one target's failure never replaces
    /// another target's report. Order is unspecified.
    pub async fn check_all(
        &self,
        targets: Vec<StatusTarget>,
    ) -> Vec<(StatusTarget, QueueResult<StatusReport>)> {
        if targets.is_empty() {
            return Vec::new();
        }
        tracing::debug!(count = targets.len(), "Checking job statuses");

        futures::stream::iter(targets)
            .map(|target| async move {
                let outcome = self.check_one(&target).await;
                (target, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }

    async fn check_one(&self, target: &StatusTarget) -> QueueResult<StatusReport> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| QueueError::Transport("Status check pool is closed".to_string()))?;

        let outcome = self
            .client
            .check_status(&target.model, &target.request_id)
            .await;

        if let Err(ref e) = outcome {
            tracing::warn!(
                request_id = %target.request_id,
                error = %e,
                "Status check failed",
            );
        }
        outcome
    }
}

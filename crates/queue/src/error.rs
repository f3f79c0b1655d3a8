//! Queue client error types.

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors from the external queue API layer.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP transport failed: {0}")]
    Transport(String),

    /// The queue returned a non-2xx status code that has no more
    /// specific meaning (auth failures, 5xx, rate limiting).
    #[error("Queue API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The queue no longer recognizes the request id.
    #[error("Request {0} not found on the queue")]
    NotFound(String),

    /// The result was requested before the job completed.
    #[error("Result for request {0} is not ready")]
    ResultNotReady(String),

    /// The response body could not be decoded.
    #[error("Invalid response from queue API: {0}")]
    Decode(String),

    /// Required configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Transient failures a caller may observe again later.
    ///
    /// `NotFound` is permanent and `ResultNotReady` is a usage error, so
    /// neither counts.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QueueError::Transport(_) | QueueError::Api { .. } | QueueError::Decode(_)
        )
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            QueueError::Decode(e.to_string())
        } else {
            QueueError::Transport(e.to_string())
        }
    }
}

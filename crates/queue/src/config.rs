use std::time::Duration;

use crate::error::{QueueError, QueueResult};

/// Default queue endpoint.
pub const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "fal-ai/flux/dev";

/// Default per-request HTTP timeout in seconds.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Queue connection settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Base URL of the queue API, without a trailing slash.
    pub base_url: String,
    /// API credential sent as `Authorization: Key <api_key>`.
    pub api_key: String,
    /// Model used for requests that do not specify one.
    pub default_model: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl QueueConfig {
    /// Create a config with defaults for everything but the credential.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_QUEUE_URL.to_string(),
            api_key: api_key.into(),
            default_model: DEFAULT_MODEL.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `GENQ_API_KEY`           | required                |
    /// | `GENQ_QUEUE_URL`         | `https://queue.fal.run` |
    /// | `GENQ_DEFAULT_MODEL`     | `fal-ai/flux/dev`       |
    /// | `GENQ_HTTP_TIMEOUT_SECS` | `60`                    |
    pub fn from_env() -> QueueResult<Self> {
        let api_key = std::env::var("GENQ_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| QueueError::Config("GENQ_API_KEY must be set".to_string()))?;

        let base_url = std::env::var("GENQ_QUEUE_URL")
            .unwrap_or_else(|_| DEFAULT_QUEUE_URL.into())
            .trim_end_matches('/')
            .to_string();

        let default_model =
            std::env::var("GENQ_DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
        genq_core::validation::validate_model_id(&default_model)
            .map_err(|e| QueueError::Config(format!("GENQ_DEFAULT_MODEL: {e}")))?;

        let http_timeout_secs: u64 = std::env::var("GENQ_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        Ok(Self {
            base_url,
            api_key,
            default_model,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }

    /// Point the client at a different endpoint (local mocks, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

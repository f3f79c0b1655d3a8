//! HTTP wrapper for the generation queue REST API.
//!
//! [`QueueApi`] provides typed async methods for the three queue
//! endpoints: submit, status, and result.  Every request carries the
//! `Authorization: Key <api_key>` header.

use async_trait::async_trait;
use genq_core::types::RequestId;
use reqwest::StatusCode;

use crate::client::QueueClient;
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::messages::{StatusReport, SubmitResponse};

/// HTTP status codes the queue uses to say a result is not available yet.
const NOT_READY_STATUSES: [StatusCode; 3] = [
    StatusCode::ACCEPTED,
    StatusCode::BAD_REQUEST,
    StatusCode::CONFLICT,
];

/// HTTP client for the generation queue.
pub struct QueueApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl QueueApi {
    /// Create an API client from configuration.
    ///
    /// The underlying [`reqwest::Client`] applies the configured
    /// per-request timeout.
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self::with_client(
            client,
            config.base_url.clone(),
            config.api_key.clone(),
        ))
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling).
    pub fn with_client(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Base HTTP URL of the queue.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Queue a request for `model`.
    ///
    /// Sends `POST {base}/{model}` with the input JSON as body.
    pub async fn submit_request(
        &self,
        model: &str,
        input: &serde_json::Value,
    ) -> QueueResult<SubmitResponse> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, model))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .json(input)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<SubmitResponse>().await?)
    }

    /// Retrieve the current status of a request.
    ///
    /// Sends `GET {base}/{model}/requests/{id}/status`.  A 404 means the
    /// queue has forgotten the request.
    pub async fn request_status(&self, model: &str, request_id: &str) -> QueueResult<StatusReport> {
        let response = self
            .client
            .get(format!(
                "{}/{}/requests/{}/status",
                self.base_url, model, request_id
            ))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(QueueError::NotFound(request_id.to_string()));
        }

        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        crate::messages::parse_status(&text).map_err(|e| QueueError::Decode(e.to_string()))
    }

    /// Retrieve the result payload of a completed request.
    ///
    /// Sends `GET {base}/{model}/requests/{id}`.
    pub async fn request_result(
        &self,
        model: &str,
        request_id: &str,
    ) -> QueueResult<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/{}/requests/{}", self.base_url, model, request_id))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(QueueError::NotFound(request_id.to_string()));
        }
        if NOT_READY_STATUSES.contains(&status) {
            return Err(QueueError::ResultNotReady(request_id.to_string()));
        }

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<serde_json::Value>().await?)
    }

    // ---- private helpers ----

    fn auth_header(&self) -> String {
        format!("Key {}", self.api_key)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`QueueError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> QueueResult<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::debug!(status = status.as_u16(), body = %body, "Queue API returned error");
            return Err(QueueError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl QueueClient for QueueApi {
    async fn submit(&self, model: &str, input: &serde_json::Value) -> QueueResult<RequestId> {
        let response = self.submit_request(model, input).await?;
        tracing::debug!(
            model,
            request_id = %response.request_id,
            "Request accepted by queue",
        );
        Ok(response.request_id)
    }

    async fn check_status(&self, model: &str, request_id: &str) -> QueueResult<StatusReport> {
        self.request_status(model, request_id).await
    }

    async fn fetch_result(
        &self,
        model: &str,
        request_id: &str,
    ) -> QueueResult<serde_json::Value> {
        self.request_result(model, request_id).await
    }
}

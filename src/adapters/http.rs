//! HTTP client for the inference service.
//!
//! Endpoints:
//!   POST /v1/invoke        - synchronous model invocation
//!   POST /v1/jobs          - submit a batch inference job
//!   GET  /v1/jobs/{id}     - fetch one job
//!   GET  /v1/jobs          - list jobs
//!   GET  /v1/models        - list enabled model ids
//!
//! Auth: optional Bearer token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ContentBlock, InferenceConfig, InferenceJob, Message};

use super::{InferenceBackend, InferenceError, InvokeOutput, InvokeRequest};

/// HTTP inference backend client
pub struct HttpInference {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

/// Request body for POST /v1/invoke
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody<'a> {
    model_id: &'a str,
    system: &'a [ContentBlock],
    messages: &'a [Message],
    inference_config: &'a InferenceConfig,
}

/// Response body from POST /v1/invoke
#[derive(Debug, Deserialize)]
struct InvokeResponse {
    text: String,
}

/// Request body for POST /v1/jobs
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJobBody<'a> {
    model_id: &'a str,
    job_name: &'a str,
    input_location: &'a str,
    output_location: &'a str,
}

/// Response body from GET /v1/models
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<String>,
}

/// Response body from GET /v1/jobs
#[derive(Debug, Deserialize)]
struct JobsResponse {
    jobs: Vec<InferenceJob>,
}

impl HttpInference {
    pub fn new(endpoint: String, token: Option<String>) -> Self {
        Self {
            endpoint,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("OPSLENS_INFERENCE_ENDPOINT")
            .context("OPSLENS_INFERENCE_ENDPOINT environment variable required")?;
        let token = std::env::var("OPSLENS_INFERENCE_TOKEN").ok();
        Ok(Self::new(endpoint, token))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    /// Map a response into either its deserialized body or a classified error
    async fn parse<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, InferenceError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| InferenceError::Fatal(format!("malformed response body: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body))
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, InferenceError> {
        self.authorize(req)
            .send()
            .await
            .map_err(|e| InferenceError::Transient(format!("request failed: {}", e)))
    }
}

/// HTTP status classification: 429 is throttling, 5xx is transient,
/// everything else will not succeed on retry.
fn classify(status: StatusCode, body: String) -> InferenceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        InferenceError::Throttled(body)
    } else if status.is_server_error() {
        InferenceError::Transient(format!("{}: {}", status, body))
    } else {
        InferenceError::Fatal(format!("{}: {}", status, body))
    }
}

#[async_trait]
impl InferenceBackend for HttpInference {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(
        &self,
        model_id: &str,
        request: &InvokeRequest,
    ) -> Result<InvokeOutput, InferenceError> {
        let body = InvokeBody {
            model_id,
            system: &request.system,
            messages: &request.messages,
            inference_config: &request.inference_config,
        };

        debug!(model_id, "invoking model");
        let response = self
            .send(self.client.post(self.url("/v1/invoke")).json(&body))
            .await?;
        let parsed: InvokeResponse = Self::parse(response).await?;
        Ok(InvokeOutput { text: parsed.text })
    }

    async fn submit_batch_job(
        &self,
        model_id: &str,
        job_name: &str,
        input_location: &str,
        output_location: &str,
    ) -> Result<InferenceJob, InferenceError> {
        let body = SubmitJobBody {
            model_id,
            job_name,
            input_location,
            output_location,
        };

        debug!(model_id, job_name, "submitting batch job");
        let response = self
            .send(self.client.post(self.url("/v1/jobs")).json(&body))
            .await?;
        Self::parse(response).await
    }

    async fn get_job(&self, job_id: &str) -> Result<InferenceJob, InferenceError> {
        let response = self
            .send(self.client.get(self.url(&format!("/v1/jobs/{}", job_id))))
            .await?;
        Self::parse(response).await
    }

    async fn list_jobs(&self) -> Result<Vec<InferenceJob>, InferenceError> {
        let response = self.send(self.client.get(self.url("/v1/jobs"))).await?;
        let parsed: JobsResponse = Self::parse(response).await?;
        Ok(parsed.jobs)
    }

    async fn enabled_models(&self) -> Result<Vec<String>, InferenceError> {
        let response = self.send(self.client.get(self.url("/v1/models"))).await?;
        let parsed: ModelsResponse = Self::parse(response).await?;
        Ok(parsed.models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = classify(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, InferenceError::Throttled(_)));
        assert!(err.is_retryable());

        let err = classify(StatusCode::BAD_GATEWAY, "upstream".into());
        assert!(matches!(err, InferenceError::Transient(_)));
        assert!(err.is_retryable());

        let err = classify(StatusCode::BAD_REQUEST, "bad input".into());
        assert!(matches!(err, InferenceError::Fatal(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_url_join_trims_trailing_slash() {
        let client = HttpInference::new("http://localhost:8080/".into(), None);
        assert_eq!(client.url("/v1/jobs"), "http://localhost:8080/v1/jobs");
    }
}

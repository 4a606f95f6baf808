//! Adapter interfaces for the inference backend.
//!
//! The backend exposes two execution styles over the same models:
//! synchronous invocation for small workloads and asynchronous batch
//! jobs for large ones. Both live behind one trait so the executors
//! and tests can swap implementations.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ContentBlock, InferenceConfig, InferenceJob, Message};

pub use http::HttpInference;

/// Errors from the inference backend, classified for retry handling
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The backend is shedding load; back off and retry
    #[error("throttled by inference backend: {0}")]
    Throttled(String),

    /// A transient failure (5xx, connection reset); safe to retry
    #[error("transient inference failure: {0}")]
    Transient(String),

    /// A request that will not succeed on retry
    #[error("inference request failed: {0}")]
    Fatal(String),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transient(_))
    }
}

/// One synchronous invocation request
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub system: Vec<ContentBlock>,
    pub messages: Vec<Message>,
    pub inference_config: InferenceConfig,
}

/// Output from a synchronous invocation
#[derive(Debug, Clone)]
pub struct InvokeOutput {
    /// The model's response text
    pub text: String,
}

/// Trait for the inference backend.
///
/// Implementations must be safe to share across spawned tasks.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Invoke a model synchronously with one request
    async fn invoke(
        &self,
        model_id: &str,
        request: &InvokeRequest,
    ) -> Result<InvokeOutput, InferenceError>;

    /// Submit an asynchronous batch job over staged JSONL input.
    ///
    /// `input_location` and `output_location` are store prefixes the
    /// backend reads from and writes to.
    async fn submit_batch_job(
        &self,
        model_id: &str,
        job_name: &str,
        input_location: &str,
        output_location: &str,
    ) -> Result<InferenceJob, InferenceError>;

    /// Fetch the current state of a submitted job
    async fn get_job(&self, job_id: &str) -> Result<InferenceJob, InferenceError>;

    /// List all jobs known to the backend, newest first
    async fn list_jobs(&self) -> Result<Vec<InferenceJob>, InferenceError>;

    /// Model ids currently enabled for this account
    async fn enabled_models(&self) -> Result<Vec<String>, InferenceError>;
}

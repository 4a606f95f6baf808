//! Run-level aggregation into a single executive summary.
//!
//! Exactly one inference call per run, over the condensed buffer the
//! reconciler built. The prompt asks for themes, never a per-item
//! enumeration, and a strict two-field JSON response. An empty buffer
//! means no call and no summary.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::adapters::{InferenceBackend, InvokeRequest};
use crate::config::Settings;
use crate::domain::{AggregationResult, ContentBlock, InferenceConfig, Message, PipelineRun};
use crate::store::{Area, ObjectStore};

const AGGREGATION_PERSONA: &str = "You are an engineering operations director preparing an \
executive briefing from a set of analyzed operational events.";

const AGGREGATION_CONTRACT: &str = r#"Synthesize the recurring themes, risks, and overall operational posture across ALL events. Do not enumerate or restate individual events.
Respond with a single JSON object and nothing else, with exactly these fields:
{"summary": string, "plan": string}
"summary" is the executive summary; "plan" is the recommended action plan."#;

pub struct Aggregator {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn InferenceBackend>,
    settings: Settings,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn InferenceBackend>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
        }
    }

    /// Summarize the reconciled buffer into one result.
    ///
    /// Returns the result and its report-area location, or None when
    /// there was nothing to summarize.
    #[instrument(skip(self, buffer, run), fields(run_key = %run.run_key, buffer_len = buffer.len()))]
    pub async fn summarize(
        &self,
        buffer: &str,
        run: &PipelineRun,
    ) -> Result<Option<(AggregationResult, String)>> {
        if buffer.trim().is_empty() {
            info!("empty buffer, skipping aggregation");
            return Ok(None);
        }

        let request = InvokeRequest {
            system: vec![ContentBlock::new(format!(
                "{}\n\n{}",
                AGGREGATION_PERSONA, AGGREGATION_CONTRACT
            ))],
            messages: vec![Message::user(buffer)],
            inference_config: InferenceConfig {
                temperature: self.settings.summary_temperature,
                top_p: self.settings.summary_top_p,
                max_tokens: self.settings.aggregation_max_tokens,
            },
        };

        let output = self
            .settings
            .retry
            .run("aggregate", || {
                self.backend
                    .invoke(&self.settings.aggregation_model, &request)
            })
            .await
            .context("aggregation inference failed")?;

        let result: AggregationResult = serde_json::from_str(output.text.trim())
            .context("aggregation response did not match the {summary, plan} schema")?;

        let location = Area::Report.key(&format!("{}/summary.json", run.run_key));
        self.store
            .put(&location, &serde_json::to_string_pretty(&result)?)
            .await?;

        info!(location = %location, "aggregation summary persisted");
        Ok(Some((result, location)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InferenceError, InvokeOutput};
    use crate::domain::{InferenceJob, SourceKind};
    use crate::store::FsObjectStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Backend that returns a canned aggregation and records calls
    struct CannedBackend {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl InferenceBackend for CannedBackend {
        fn name(&self) -> &str {
            "canned"
        }

        async fn invoke(
            &self,
            _model_id: &str,
            _request: &InvokeRequest,
        ) -> Result<InvokeOutput, InferenceError> {
            *self.calls.lock().unwrap() += 1;
            Ok(InvokeOutput {
                text: r#"{"summary": "Throttling dominated.", "plan": "Raise limits."}"#
                    .to_string(),
            })
        }

        async fn submit_batch_job(
            &self,
            _model_id: &str,
            _job_name: &str,
            _input_location: &str,
            _output_location: &str,
        ) -> Result<InferenceJob, InferenceError> {
            Err(InferenceError::Fatal("not supported".into()))
        }

        async fn get_job(&self, _job_id: &str) -> Result<InferenceJob, InferenceError> {
            Err(InferenceError::Fatal("not supported".into()))
        }

        async fn list_jobs(&self) -> Result<Vec<InferenceJob>, InferenceError> {
            Ok(vec![])
        }

        async fn enabled_models(&self) -> Result<Vec<String>, InferenceError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_empty_buffer_makes_no_call() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(CannedBackend {
            calls: Mutex::new(0),
        });
        let aggregator = Aggregator::new(
            Arc::new(FsObjectStore::new(dir.path())),
            Arc::clone(&backend) as Arc<dyn InferenceBackend>,
            Settings::default(),
        );

        let run = PipelineRun::new(SourceKind::Cases);
        let result = aggregator.summarize("", &run).await.unwrap();
        assert!(result.is_none());
        assert_eq!(*backend.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_summarize_calls_once_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path()));
        let backend = Arc::new(CannedBackend {
            calls: Mutex::new(0),
        });
        let aggregator = Aggregator::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&backend) as Arc<dyn InferenceBackend>,
            Settings::default(),
        );

        let run = PipelineRun::new(SourceKind::Cases);
        let buffer = "event: 1\nsentiment: Negative\nThrottling on deploy.\n\n";
        let (result, location) = aggregator.summarize(buffer, &run).await.unwrap().unwrap();

        assert_eq!(result.summary, "Throttling dominated.");
        assert_eq!(location, format!("report/{}/summary.json", run.run_key));
        assert_eq!(*backend.calls.lock().unwrap(), 1);
        assert!(store.get(&location).await.unwrap().contains("Raise limits."));
    }
}

//! Synchronous (on-demand) execution of staged work items.
//!
//! Bounded-parallel map over input-area keys. Each item is fetched,
//! invoked with backoff, and its raw output persisted under
//! `output/ondemand/{run_key}/`. Per-item failures are logged and
//! skipped so one bad item never sinks the run.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

use crate::adapters::{InferenceBackend, InvokeRequest};
use crate::config::Settings;
use crate::domain::{BatchRecord, PipelineRun, SourceKind};
use crate::store::{Area, ObjectStore};

pub struct OnDemandExecutor {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn InferenceBackend>,
    settings: Settings,
}

impl OnDemandExecutor {
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

    /// Raw-output key for one processed input key
    fn output_key(run_key: &str, input_key: &str) -> String {
        let stem = input_key
            .rsplit('/')
            .next()
            .unwrap_or(input_key)
            .trim_end_matches(".jsonl");
        Area::Output.key(&format!("ondemand/{}/{}.json", run_key, stem))
    }

    /// Process one staged item end to end.
    ///
    /// Consumes the input object (deletes it) only when the source kind
    /// does not retain processed inputs.
    async fn process_one(
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn InferenceBackend>,
        settings: Settings,
        kind: SourceKind,
        run_key: String,
        input_key: String,
    ) -> Result<()> {
        let line = store.get(&input_key).await?;
        let record: BatchRecord = serde_json::from_str(&line)
            .with_context(|| format!("malformed staged record at {}", input_key))?;

        let request = InvokeRequest {
            system: record.model_input.system,
            messages: record.model_input.messages,
            inference_config: record.model_input.inference_config,
        };

        let output = settings
            .retry
            .run("invoke", || backend.invoke(&settings.text_model, &request))
            .await
            .with_context(|| format!("inference failed for {}", input_key))?;

        store
            .put(&Self::output_key(&run_key, &input_key), &output.text)
            .await?;

        if !kind.retain_input() {
            store.delete(&input_key).await?;
        }
        Ok(())
    }

    /// Execute all keys with bounded parallelism; returns the number of
    /// items that produced raw output.
    #[instrument(skip(self, keys), fields(run_key = %run.run_key, items = keys.len()))]
    pub async fn execute(&self, keys: Vec<String>, run: &PipelineRun) -> Result<usize> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallelism.max(1)));
        let mut tasks = JoinSet::new();

        for key in keys {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("semaphore closed")?;
            let store = Arc::clone(&self.store);
            let backend = Arc::clone(&self.backend);
            let settings = self.settings.clone();
            let kind = run.mode;
            let run_key = run.run_key.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let result = Self::process_one(store, backend, settings, kind, run_key, key.clone())
                    .await;
                (key, result)
            });
        }

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => succeeded += 1,
                Ok((key, Err(e))) => {
                    failed += 1;
                    error!(key = %key, error = %format!("{:#}", e), "item failed, skipping");
                }
                Err(e) => {
                    failed += 1;
                    error!(error = %e, "item task panicked");
                }
            }
        }

        info!(succeeded, failed, "on-demand execution finished");
        Ok(succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_key_scoped_by_run() {
        let key = OnDemandExecutor::output_key("20250101-120000", "input/case-170012345.jsonl");
        assert_eq!(key, "output/ondemand/20250101-120000/case-170012345.json");
    }
}

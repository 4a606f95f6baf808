//! Output reconciliation with per-item failure isolation.
//!
//! Raw model output comes back in two shapes: batch jobs write JSONL
//! files of envelope records (`modelOutput.output.message.content[0]
//! .text` holds the response), while on-demand invocations persist the
//! bare response text. Both paths converge here: validate each payload
//! against its source schema, persist the validated result under the
//! run's report prefix, and append a condensed fragment to the
//! aggregation buffer. Any per-item malformation is logged and skipped;
//! only run-level I/O failures raise.

use std::sync::Arc;

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{info, instrument, warn};

use crate::config::Settings;
use crate::domain::item::sanitize;
use crate::domain::{Batch, InferenceJob, ItemAnalysis, JobStatus, PipelineRun, SourceKind};
use crate::store::{Area, ObjectStore};

/// What one reconciliation pass produced
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Items validated and persisted to the report area
    pub processed: usize,

    /// Items skipped for malformed or invalid output
    pub skipped: usize,

    /// Concatenated condensed fragments, one per processed item
    pub buffer: String,
}

impl ReconcileOutcome {
    pub fn merge(&mut self, other: ReconcileOutcome) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.buffer.push_str(&other.buffer);
    }
}

pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    settings: Settings,
    skip_patterns: Vec<Pattern>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, settings: Settings) -> Self {
        let skip_patterns = settings
            .skip_patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "ignoring invalid skip pattern");
                    None
                }
            })
            .collect();
        Self {
            store,
            settings,
            skip_patterns,
        }
    }

    /// Housekeeping artifacts (manifests etc.) are never item output
    fn is_housekeeping(&self, key: &str) -> bool {
        let name = key.rsplit('/').next().unwrap_or(key);
        self.skip_patterns.iter().any(|p| p.matches(name))
    }

    /// Validate one response payload and persist it to the report area.
    ///
    /// Returns the fragment for the aggregation buffer, or None when
    /// the payload does not satisfy the schema for `kind`.
    async fn accept(
        &self,
        kind: SourceKind,
        run_key: &str,
        source_key: &str,
        payload_text: &str,
    ) -> Result<Option<String>> {
        let value: serde_json::Value = match serde_json::from_str(payload_text.trim()) {
            Ok(v) => v,
            Err(e) => {
                warn!(source_key, error = %e, "response is not valid JSON, skipping");
                return Ok(None);
            }
        };

        let analysis = match ItemAnalysis::from_value(kind, value) {
            Ok(a) => a,
            Err(e) => {
                warn!(source_key, error = %e, "response failed schema validation, skipping");
                return Ok(None);
            }
        };

        let report_key = Area::Report.key(&format!(
            "{}/events/{}-output.json",
            run_key,
            sanitize(&analysis.id())
        ));
        self.store
            .put(&report_key, &serde_json::to_string_pretty(&analysis)?)
            .await?;

        Ok(Some(analysis.fragment()))
    }

    /// Reconcile the raw outputs of completed batch jobs.
    ///
    /// Completed jobs have their raw outputs archived and their staging
    /// prefix cleaned; failed jobs keep both in place for inspection.
    #[instrument(skip(self, jobs, run), fields(run_key = %run.run_key))]
    pub async fn reconcile_batch(
        &self,
        jobs: &[(Batch, InferenceJob)],
        run: &PipelineRun,
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        for (batch, job) in jobs {
            if job.status != JobStatus::Completed {
                warn!(
                    batch_id = %batch.batch_id,
                    status = %job.status,
                    "batch job did not complete, leaving its items staged"
                );
                continue;
            }

            let keys = self
                .store
                .list(&batch.output_prefix)
                .await
                .with_context(|| format!("failed to list output of {}", batch.batch_id))?;

            for key in keys {
                if self.is_housekeeping(&key) {
                    continue;
                }

                let body = self
                    .store
                    .get(&key)
                    .await
                    .with_context(|| format!("failed to read raw output {}", key))?;

                for line in body.lines().filter(|l| !l.trim().is_empty()) {
                    match extract_batch_response(line) {
                        Some(text) => {
                            match self.accept(run.mode, &run.run_key, &key, &text).await? {
                                Some(fragment) => {
                                    outcome.processed += 1;
                                    outcome.buffer.push_str(&fragment);
                                }
                                None => outcome.skipped += 1,
                            }
                        }
                        None => {
                            warn!(key = %key, "malformed output envelope, skipping record");
                            outcome.skipped += 1;
                        }
                    }
                }

                // raw output is archived once its records are consumed
                let name = key.rsplit('/').next().unwrap_or(&key);
                self.store
                    .move_object(
                        &key,
                        &Area::Archive.key(&format!("{}/{}", batch.batch_id, name)),
                    )
                    .await?;
            }

            self.clean_staging(batch, run.mode).await?;
        }

        info!(
            processed = outcome.processed,
            skipped = outcome.skipped,
            "batch reconciliation finished"
        );
        Ok(outcome)
    }

    /// Drop or archive the staged inputs of a completed batch.
    ///
    /// Sources with input retention keep their records (moved to the
    /// archive area); others are deleted outright.
    async fn clean_staging(&self, batch: &Batch, kind: SourceKind) -> Result<()> {
        let staged = self.store.list(&batch.input_prefix).await?;
        for key in staged {
            if kind.retain_input() {
                let name = key.rsplit('/').next().unwrap_or(&key);
                self.store
                    .move_object(
                        &key,
                        &Area::Archive.key(&format!("inputs/{}/{}", batch.batch_id, name)),
                    )
                    .await?;
            } else {
                self.store.delete(&key).await?;
            }
        }
        Ok(())
    }

    /// Reconcile the raw outputs of this run's on-demand invocations.
    ///
    /// On-demand outputs are bare response text and stay in place after
    /// reconciliation.
    #[instrument(skip(self, run), fields(run_key = %run.run_key))]
    pub async fn reconcile_ondemand(&self, run: &PipelineRun) -> Result<ReconcileOutcome> {
        let prefix = Area::Output.key(&format!("ondemand/{}/", run.run_key));
        let keys = self
            .store
            .list(&prefix)
            .await
            .context("failed to list on-demand output")?;

        let mut outcome = ReconcileOutcome::default();
        for key in keys {
            if self.is_housekeeping(&key) {
                continue;
            }

            let text = self
                .store
                .get(&key)
                .await
                .with_context(|| format!("failed to read raw output {}", key))?;

            match self.accept(run.mode, &run.run_key, &key, &text).await? {
                Some(fragment) => {
                    outcome.processed += 1;
                    outcome.buffer.push_str(&fragment);
                }
                None => outcome.skipped += 1,
            }
        }

        info!(
            processed = outcome.processed,
            skipped = outcome.skipped,
            "on-demand reconciliation finished"
        );
        Ok(outcome)
    }
}

/// Pull the response text out of one batch output envelope line
fn extract_batch_response(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value
        .get("modelOutput")?
        .get("output")?
        .get("message")?
        .get("content")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;
    use tempfile::TempDir;

    fn envelope(text: &serde_json::Value) -> String {
        serde_json::json!({
            "recordId": "opslens-abc123",
            "modelInput": {},
            "modelOutput": {
                "output": {
                    "message": {
                        "content": [{"text": text.to_string()}]
                    }
                }
            }
        })
        .to_string()
    }

    fn case_payload(id: &str) -> serde_json::Value {
        serde_json::json!({
            "caseId": id,
            "category": "throttling",
            "case_summary": "Hit API limits during deploy.",
            "sentiment": "Negative"
        })
    }

    #[test]
    fn test_extract_batch_response() {
        let line = envelope(&case_payload("1"));
        let text = extract_batch_response(&line).unwrap();
        assert!(text.contains("throttling"));

        assert!(extract_batch_response("not json").is_none());
        assert!(extract_batch_response(r#"{"modelOutput": {}}"#).is_none());
    }

    #[tokio::test]
    async fn test_housekeeping_artifacts_skipped() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path()));
        let reconciler = Reconciler::new(store, Settings::default());

        assert!(reconciler.is_housekeeping("output/b1/manifest.json.out"));
        assert!(!reconciler.is_housekeeping("output/b1/part-0.jsonl.out"));
    }

    #[tokio::test]
    async fn test_ondemand_reconcile_validates_and_reports() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path()));
        let run = PipelineRun::new(SourceKind::Cases);

        let prefix = format!("output/ondemand/{}", run.run_key);
        store
            .put(
                &format!("{}/case-1.json", prefix),
                &case_payload("1").to_string(),
            )
            .await
            .unwrap();
        store
            .put(&format!("{}/case-2.json", prefix), "this is not json")
            .await
            .unwrap();

        let reconciler = Reconciler::new(Arc::clone(&store) as Arc<dyn ObjectStore>, Settings::default());
        let outcome = reconciler.reconcile_ondemand(&run).await.unwrap();

        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.buffer.contains("event: 1"));
        assert!(outcome.buffer.contains("sentiment: Negative"));

        let report_key = format!("report/{}/events/1-output.json", run.run_key);
        let report = store.get(&report_key).await.unwrap();
        assert!(report.contains("throttling"));

        // on-demand raw output stays in place
        assert!(store.get(&format!("{}/case-1.json", prefix)).await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_reconcile_archives_and_cleans() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path()));
        let run = PipelineRun::new(SourceKind::Cases);

        let batch = crate::domain::Batch::new(SourceKind::Cases, 0, vec![]);
        let out_key = format!("{}part-0.jsonl.out", batch.output_prefix);
        // two valid records around a truncated one
        let body = format!(
            "{}\n{{\"modelOutput\": {{\"truncated\n{}\n",
            envelope(&case_payload("1")),
            envelope(&case_payload("2"))
        );
        store.put(&out_key, &body).await.unwrap();
        store
            .put(
                &format!("{}manifest.json.out", batch.output_prefix),
                "{}",
            )
            .await
            .unwrap();
        store
            .put(&format!("{}case-1.jsonl", batch.input_prefix), "{}")
            .await
            .unwrap();

        let job = InferenceJob {
            job_id: "job-1".to_string(),
            job_arn: "arn:job-1".to_string(),
            batch_id: batch.batch_id.clone(),
            status: JobStatus::Completed,
            submit_time: chrono::Utc::now(),
            end_time: Some(chrono::Utc::now()),
        };

        let reconciler = Reconciler::new(Arc::clone(&store) as Arc<dyn ObjectStore>, Settings::default());
        let outcome = reconciler
            .reconcile_batch(&[(batch.clone(), job)], &run)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.skipped, 1);

        // raw output archived, staging for cases deleted
        assert!(store.get(&out_key).await.is_err());
        assert!(store
            .get(&format!("archive/{}/part-0.jsonl.out", batch.batch_id))
            .await
            .is_ok());
        assert!(store
            .get(&format!("{}case-1.jsonl", batch.input_prefix))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_incomplete_job_leaves_items_staged() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path()));
        let run = PipelineRun::new(SourceKind::Cases);

        let batch = crate::domain::Batch::new(SourceKind::Cases, 0, vec![]);
        let staged_key = format!("{}case-1.jsonl", batch.input_prefix);
        store.put(&staged_key, "{}").await.unwrap();

        let job = InferenceJob {
            job_id: "job-1".to_string(),
            job_arn: "arn:job-1".to_string(),
            batch_id: batch.batch_id.clone(),
            status: JobStatus::Failed,
            submit_time: chrono::Utc::now(),
            end_time: Some(chrono::Utc::now()),
        };

        let reconciler = Reconciler::new(Arc::clone(&store) as Arc<dyn ObjectStore>, Settings::default());
        let outcome = reconciler.reconcile_batch(&[(batch, job)], &run).await.unwrap();

        assert_eq!(outcome.processed, 0);
        assert!(store.get(&staged_key).await.is_ok());
    }
}

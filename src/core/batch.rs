//! Batch job lifecycle: sharding, submission, and polling.
//!
//! Staged keys are partitioned into full shards of exactly the
//! inflection threshold; the trailing partial shard is never submitted
//! and stays in the input area for a later cycle. Submitting a shard
//! moves its members into a batch-scoped prefix, so membership is
//! exclusive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{info, instrument};

use crate::adapters::InferenceBackend;
use crate::config::Settings;
use crate::domain::{Batch, InferenceJob, PipelineRun, SourceKind};
use crate::store::ObjectStore;

/// Partition of staged keys into submittable shards
#[derive(Debug, Clone)]
pub struct ShardPlan {
    /// Full shards, each exactly `shard_size` keys
    pub shards: Vec<Vec<String>>,

    /// Trailing partial shard, left staged for a subsequent cycle
    pub remaining: Vec<String>,
}

/// Split keys into floor(N/T) full shards plus a remainder
pub fn shard(keys: Vec<String>, shard_size: usize) -> ShardPlan {
    let full = (keys.len() / shard_size) * shard_size;
    let mut shards = Vec::new();
    let mut iter = keys.into_iter();

    let mut taken = 0;
    while taken < full {
        shards.push(iter.by_ref().take(shard_size).collect());
        taken += shard_size;
    }

    ShardPlan {
        shards,
        remaining: iter.collect(),
    }
}

/// Result of submitting a shard plan
#[derive(Debug, Clone)]
pub struct BatchSubmission {
    /// One (batch, job) pair per submitted shard
    pub jobs: Vec<(Batch, InferenceJob)>,

    /// Keys left unbatched
    pub remaining_count: usize,
}

pub struct BatchJobManager {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn InferenceBackend>,
    settings: Settings,
}

impl BatchJobManager {
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

    /// Submit one job per full shard.
    ///
    /// Members are moved into `batches/{batch_id}/` before submission;
    /// the move is copy-then-delete and not atomic.
    #[instrument(skip(self, plan, run), fields(run_key = %run.run_key, shards = plan.shards.len()))]
    pub async fn submit(
        &self,
        kind: SourceKind,
        plan: ShardPlan,
        run: &PipelineRun,
    ) -> Result<BatchSubmission> {
        let mut jobs = Vec::with_capacity(plan.shards.len());

        for (index, members) in plan.shards.into_iter().enumerate() {
            let batch = Batch::new(kind, index, members);

            for key in &batch.member_keys {
                let name = key.rsplit('/').next().unwrap_or(key);
                let dst = format!("{}{}", batch.input_prefix, name);
                self.store
                    .move_object(key, &dst)
                    .await
                    .with_context(|| format!("failed to stage {} into {}", key, batch.batch_id))?;
            }

            let mut job = self
                .settings
                .retry
                .run("submit_batch_job", || {
                    self.backend.submit_batch_job(
                        &self.settings.text_model,
                        &batch.batch_id,
                        &batch.input_prefix,
                        &batch.output_prefix,
                    )
                })
                .await
                .with_context(|| format!("failed to submit batch {}", batch.batch_id))?;
            job.batch_id = batch.batch_id.clone();

            info!(
                batch_id = %batch.batch_id,
                job_id = %job.job_id,
                members = batch.member_keys.len(),
                "submitted batch job"
            );
            jobs.push((batch, job));
        }

        Ok(BatchSubmission {
            jobs,
            remaining_count: plan.remaining.len(),
        })
    }

    /// Poll until every job reaches a terminal status.
    ///
    /// Sleeps the configured poll interval between cycles and fails if
    /// the run's wall-clock budget expires first.
    #[instrument(skip(self, jobs), fields(jobs = jobs.len()))]
    pub async fn poll_until_complete(
        &self,
        jobs: &[(Batch, InferenceJob)],
        started: Instant,
    ) -> Result<Vec<(Batch, InferenceJob)>> {
        let budget = Duration::from_secs(self.settings.run_timeout_secs);
        let interval = Duration::from_secs(self.settings.poll_interval_secs);

        let mut current: Vec<(Batch, InferenceJob)> = jobs.to_vec();
        loop {
            let mut counts: HashMap<String, usize> = HashMap::new();
            let mut all_terminal = true;

            for (_, job) in &mut current {
                if !job.status.is_terminal() {
                    let job_id = job.job_id.clone();
                    let refreshed = self
                        .settings
                        .retry
                        .run("get_job", || self.backend.get_job(&job_id))
                        .await
                        .with_context(|| format!("failed to poll job {}", job_id))?;
                    *job = refreshed;
                }
                all_terminal &= job.status.is_terminal();
                *counts.entry(job.status.to_string()).or_default() += 1;
            }

            info!(?counts, "batch job status");
            if all_terminal {
                return Ok(current);
            }

            if started.elapsed() + interval > budget {
                bail!(
                    "run budget of {}s exhausted while polling batch jobs",
                    self.settings.run_timeout_secs
                );
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Count backend jobs still in a non-terminal state
    pub async fn outstanding_jobs(&self) -> Result<usize> {
        let jobs = self
            .settings
            .retry
            .run("list_jobs", || self.backend.list_jobs())
            .await
            .context("failed to list inference jobs")?;
        Ok(jobs.iter().filter(|j| !j.status.is_terminal()).count())
    }
}

//! Pipeline controller: the guarded state graph driving one run.
//!
//! `CheckModelAccess → CheckNoConcurrentRun → CheckNoOutstandingBatch →
//! CollectWorkItems → Route → {OnDemandBranch | BatchBranch} →
//! Aggregate → End`. Guard stops are halts, not errors; only real
//! failures propagate. The whole run lives under a wall-clock budget.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use tracing::{info, instrument, warn};

use crate::adapters::InferenceBackend;
use crate::config::Settings;
use crate::core::aggregate::Aggregator;
use crate::core::batch::{shard, BatchJobManager};
use crate::core::journal::Journal;
use crate::core::normalize::Normalizer;
use crate::core::ondemand::OnDemandExecutor;
use crate::core::reconcile::Reconciler;
use crate::core::router::{decide, Dispatch};
use crate::domain::{HaltReason, PipelineRun, RunOutcome, SourceKind, SourceRecord};
use crate::store::ObjectStore;

/// Exclusive lock held for the duration of one run.
///
/// Backed by an OS file lock, so a crashed process releases it
/// automatically. Acquiring while another process holds it yields
/// `None`, never blocks.
pub struct RunLock {
    file: File,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).context("failed to acquire run lock"),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(error = %e, "failed to release run lock");
        }
    }
}

pub struct PipelineController {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn InferenceBackend>,
    settings: Settings,
}

impl PipelineController {
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

    fn check_budget(&self, started: Instant) -> Result<()> {
        let budget = Duration::from_secs(self.settings.run_timeout_secs);
        if started.elapsed() > budget {
            bail!(
                "run budget of {}s exhausted",
                self.settings.run_timeout_secs
            );
        }
        Ok(())
    }

    /// Model-access guard: every model the run needs must be enabled
    async fn models_available(&self) -> Result<bool> {
        let enabled = self
            .settings
            .retry
            .run("enabled_models", || self.backend.enabled_models())
            .await
            .context("failed to list enabled models")?;
        Ok(enabled.contains(&self.settings.text_model)
            && enabled.contains(&self.settings.aggregation_model))
    }

    /// Drive one pipeline run over freshly collected source records.
    ///
    /// `since` is the collection cursor the records were gathered from;
    /// it keys the run's artifacts by the covered interval. Previously
    /// staged items of the same kind (e.g. the remainder of an earlier
    /// batch cycle) are picked up by the census and included.
    #[instrument(skip(self, records, since), fields(mode = %mode, records = records.len()))]
    pub async fn run(
        &self,
        mode: SourceKind,
        records: Vec<SourceRecord>,
        since: Option<DateTime<Utc>>,
    ) -> Result<PipelineRun> {
        let started = Instant::now();
        let mut run = PipelineRun::with_since(mode, since);
        let journal = Journal::open(self.settings.runs_dir(), run.run_id).await?;
        journal
            .ok("start", format!("mode={} run_key={}", mode, run.run_key))
            .await?;

        if !self.models_available().await? {
            return self
                .halt(&mut run, &journal, HaltReason::ModelsUnavailable)
                .await;
        }

        let _lock = match RunLock::acquire(&self.settings.lock_path())? {
            Some(lock) => lock,
            None => {
                return self
                    .halt(&mut run, &journal, HaltReason::RunInProgress)
                    .await;
            }
        };

        let batch_manager = BatchJobManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.backend),
            self.settings.clone(),
        );
        if batch_manager.outstanding_jobs().await? > 0 {
            return self
                .halt(&mut run, &journal, HaltReason::BatchInProgress)
                .await;
        }

        match self.execute(&mut run, records, &batch_manager, &journal, started).await {
            Ok(()) => Ok(run),
            Err(e) => {
                journal.failed("run", format!("{:#}", e)).await?;
                Err(e)
            }
        }
    }

    async fn halt(
        &self,
        run: &mut PipelineRun,
        journal: &Journal,
        reason: HaltReason,
    ) -> Result<PipelineRun> {
        info!(%reason, "run halted");
        journal.halted("guard", reason.to_string()).await?;
        run.finish(RunOutcome::Halted { reason });
        Ok(run.clone())
    }

    /// The post-guard portion of the state graph
    async fn execute(
        &self,
        run: &mut PipelineRun,
        records: Vec<SourceRecord>,
        batch_manager: &BatchJobManager,
        journal: &Journal,
        started: Instant,
    ) -> Result<()> {
        let normalizer = Normalizer::new(Arc::clone(&self.store), self.settings.clone());
        let collected = normalizer.collect(&records).await?;
        journal
            .ok(
                "collect",
                format!(
                    "staged={} skipped={}",
                    collected.keys.len(),
                    collected.skipped
                ),
            )
            .await?;

        // census over the input area, not just this invocation's
        // records, so earlier remainders get another chance
        let keys = normalizer.census(run.mode).await?;
        run.items_collected = keys.len();
        self.check_budget(started)?;

        let dispatch = decide(keys.len(), self.settings.inflection_threshold);
        journal.ok("route", format!("{:?}", dispatch)).await?;

        let reconciler = Reconciler::new(Arc::clone(&self.store), self.settings.clone());
        let outcome = match dispatch {
            Dispatch::Nothing => {
                journal.halted("route", HaltReason::NoWork.to_string()).await?;
                run.finish(RunOutcome::Halted {
                    reason: HaltReason::NoWork,
                });
                return Ok(());
            }
            Dispatch::OnDemand(n) => {
                info!(items = n, "dispatching on-demand");
                let executor = OnDemandExecutor::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.backend),
                    self.settings.clone(),
                );
                let produced = executor.execute(keys, run).await?;
                journal
                    .ok("ondemand", format!("produced={}", produced))
                    .await?;
                self.check_budget(started)?;
                reconciler.reconcile_ondemand(run).await?
            }
            Dispatch::Batch(n) => {
                info!(items = n, "dispatching as batch jobs");
                let plan = shard(keys, self.settings.inflection_threshold);
                run.items_remaining = plan.remaining.len();

                let submission = batch_manager.submit(run.mode, plan, run).await?;
                journal
                    .ok(
                        "submit",
                        format!(
                            "jobs={} remaining={}",
                            submission.jobs.len(),
                            submission.remaining_count
                        ),
                    )
                    .await?;

                let jobs = batch_manager
                    .poll_until_complete(&submission.jobs, started)
                    .await?;
                journal.ok("poll", "all jobs terminal").await?;
                self.check_budget(started)?;
                reconciler.reconcile_batch(&jobs, run).await?
            }
        };

        journal
            .ok(
                "reconcile",
                format!("processed={} skipped={}", outcome.processed, outcome.skipped),
            )
            .await?;
        self.check_budget(started)?;

        let aggregator = Aggregator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.backend),
            self.settings.clone(),
        );
        let summary_location = aggregator
            .summarize(&outcome.buffer, run)
            .await?
            .map(|(_, location)| location);
        journal
            .ok(
                "aggregate",
                summary_location.clone().unwrap_or_else(|| "no summary".to_string()),
            )
            .await?;

        run.finish(RunOutcome::Completed {
            items_processed: outcome.processed,
            summary_location,
        });
        journal.ok("end", "completed").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs").join("run.lock");

        let first = RunLock::acquire(&path).unwrap();
        assert!(first.is_some());

        let second = RunLock::acquire(&path).unwrap();
        assert!(second.is_none());

        drop(first);
        let third = RunLock::acquire(&path).unwrap();
        assert!(third.is_some());
    }
}

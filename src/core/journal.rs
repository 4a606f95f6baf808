//! Append-only run journal.
//!
//! One JSONL file per pipeline run under `{home}/runs/{run_id}/`.
//! Every state transition, guard halt, and terminal outcome is appended
//! so a halted run can be told apart from a failed one after the fact.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// One journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Pipeline stage the event belongs to (e.g. "route", "reconcile")
    pub stage: String,
    /// Human-readable detail
    pub detail: String,
    /// Coarse status: "ok", "halted", "failed"
    pub status: String,
}

/// Append-only journal for one run
pub struct Journal {
    run_id: Uuid,
    path: PathBuf,
}

impl Journal {
    /// Open (creating directories as needed) the journal for a run
    pub async fn open(runs_dir: PathBuf, run_id: Uuid) -> Result<Self> {
        let dir = runs_dir.join(run_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create run directory {}", dir.display()))?;
        Ok(Self {
            run_id,
            path: dir.join("events.jsonl"),
        })
    }

    pub async fn append(&self, stage: &str, detail: impl Into<String>, status: &str) -> Result<()> {
        let event = RunEvent {
            run_id: self.run_id,
            timestamp: Utc::now(),
            stage: stage.to_string(),
            detail: detail.into(),
            status: status.to_string(),
        };

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open journal {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn ok(&self, stage: &str, detail: impl Into<String>) -> Result<()> {
        self.append(stage, detail, "ok").await
    }

    pub async fn halted(&self, stage: &str, detail: impl Into<String>) -> Result<()> {
        self.append(stage, detail, "halted").await
    }

    pub async fn failed(&self, stage: &str, detail: impl Into<String>) -> Result<()> {
        self.append(stage, detail, "failed").await
    }

    /// Read all events back (used by tests and inspection tooling)
    pub async fn read_all(&self) -> Result<Vec<RunEvent>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read journal {}", self.path.display()))?;
        content
            .lines()
            .map(|line| serde_json::from_str(line).context("malformed journal line"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let run_id = Uuid::new_v4();
        let journal = Journal::open(dir.path().to_path_buf(), run_id).await.unwrap();

        journal.ok("route", "dispatching 42 items on-demand").await.unwrap();
        journal.halted("guard", "batch job in progress").await.unwrap();

        let events = journal.read_all().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stage, "route");
        assert_eq!(events[0].status, "ok");
        assert_eq!(events[1].status, "halted");
        assert!(events.iter().all(|e| e.run_id == run_id));
    }
}

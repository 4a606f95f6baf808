//! Batches and the asynchronous inference jobs that process them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Area;

use super::item::SourceKind;

/// A fixed-size group of work items submitted as one asynchronous job.
///
/// Members are moved (not copied) into the batch-scoped input prefix
/// when the batch is created, so an item belongs to at most one open
/// batch at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Collision-free identifier, also used as the staging prefix
    pub batch_id: String,

    /// Zero-based shard position within the run
    pub shard_index: usize,

    /// Input-area keys of the member items (as they were before the move)
    pub member_keys: Vec<String>,

    /// Batch-scoped staging prefix the members were moved into
    pub input_prefix: String,

    /// Run-scoped prefix the job writes raw outputs into
    pub output_prefix: String,
}

impl Batch {
    /// Mint a new batch with a unique id: `{kind}-batch{n}-{uuid8}`
    pub fn new(kind: SourceKind, shard_index: usize, member_keys: Vec<String>) -> Self {
        let suffix = &Uuid::new_v4().simple().to_string()[..8];
        let batch_id = format!("{}-batch{}-{}", kind.as_str(), shard_index + 1, suffix);
        let input_prefix = format!("{}/", Area::Batches.key(&batch_id));
        let output_prefix = format!("{}/", Area::Output.key(&batch_id));
        Self {
            batch_id,
            shard_index,
            member_keys,
            input_prefix,
            output_prefix,
        }
    }
}

/// Status of an asynchronous inference job.
///
/// Transitions are owned by the backend and observed via polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Validating,
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Stopping,
    Stopped,
}

impl JobStatus {
    /// Terminal states are {Completed, Failed, Stopped}
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submitted => "Submitted",
            Self::Validating => "Validating",
            Self::Scheduled => "Scheduled",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// The backend-tracked handle for a submitted batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceJob {
    pub job_id: String,

    pub job_arn: String,

    /// The batch this job was submitted for (empty for jobs submitted
    /// outside this process)
    #[serde(default)]
    pub batch_id: String,

    pub status: JobStatus,

    pub submit_time: DateTime<Utc>,

    pub end_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_ids_are_unique() {
        let a = Batch::new(SourceKind::Cases, 0, vec![]);
        let b = Batch::new(SourceKind::Cases, 0, vec![]);
        assert_ne!(a.batch_id, b.batch_id);
        assert!(a.batch_id.starts_with("cases-batch1-"));
        assert_eq!(a.input_prefix, format!("batches/{}/", a.batch_id));
        assert_eq!(a.output_prefix, format!("output/{}/", a.batch_id));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());

        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::Validating.is_terminal());
        assert!(!JobStatus::Scheduled.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(!JobStatus::Stopping.is_terminal());
    }
}

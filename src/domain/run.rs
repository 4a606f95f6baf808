//! Pipeline run context and outcomes.
//!
//! A run is created at entry, threads the mode and run key through every
//! stage, and ends in exactly one outcome. Guard halts are expected,
//! non-error stops and are kept distinct from failures: a halted run is
//! not an incident.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::SourceKind;

/// Why a run stopped before doing any inference work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// One or more required models are not accessible
    ModelsUnavailable,

    /// Another run currently holds the run lock
    RunInProgress,

    /// Outstanding batch inference jobs from a previous run or a manual
    /// submission are still incomplete
    BatchInProgress,

    /// No work items were found to process
    NoWork,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::ModelsUnavailable => "required models not enabled",
            Self::RunInProgress => "a run is already in progress",
            Self::BatchInProgress => "batch inference jobs in progress",
            Self::NoWork => "no items were found to process",
        };
        f.write_str(msg)
    }
}

/// Terminal outcome of a pipeline run.
///
/// Run-level failures are not an outcome; they propagate as errors and
/// are surfaced to the operator separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    Completed {
        items_processed: usize,
        summary_location: Option<String>,
    },
    Halted {
        reason: HaltReason,
    },
}

/// `run_key` timestamp format
const KEY_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Execution context for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,

    pub mode: SourceKind,

    /// Timestamp key scoping all artifacts of this run
    pub run_key: String,

    /// Collection cursor the run's records were gathered from
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Items found by the collection census
    pub items_collected: usize,

    /// Items left unbatched for a subsequent cycle (batch mode only)
    pub items_remaining: usize,

    pub outcome: Option<RunOutcome>,
}

impl PipelineRun {
    pub fn new(mode: SourceKind) -> Self {
        Self::with_since(mode, None)
    }

    /// A run scoped by a collection cursor keys its artifacts by the
    /// covered interval, `{since}-{started}`; without one, by the start
    /// timestamp alone.
    pub fn with_since(mode: SourceKind, since: Option<DateTime<Utc>>) -> Self {
        let started_at = Utc::now();
        let run_key = match since {
            Some(since) => format!(
                "{}-{}",
                since.format(KEY_FORMAT),
                started_at.format(KEY_FORMAT)
            ),
            None => started_at.format(KEY_FORMAT).to_string(),
        };
        Self {
            run_id: Uuid::new_v4(),
            mode,
            run_key,
            since,
            started_at,
            completed_at: None,
            items_collected: 0,
            items_remaining: 0,
            outcome: None,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.completed_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.outcome, Some(RunOutcome::Halted { .. }))
    }

    pub fn items_processed(&self) -> usize {
        match &self.outcome {
            Some(RunOutcome::Completed {
                items_processed, ..
            }) => *items_processed,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_key_format() {
        let run = PipelineRun::new(SourceKind::Cases);
        // %Y%m%d-%H%M%S
        assert_eq!(run.run_key.len(), 15);
        assert!(run.run_key.chars().nth(8) == Some('-'));
        assert!(run.since.is_none());
    }

    #[test]
    fn test_run_key_spans_cursor_interval() {
        let since = chrono::TimeZone::with_ymd_and_hms(&Utc, 2023, 1, 1, 0, 0, 0).unwrap();
        let run = PipelineRun::with_since(SourceKind::Cases, Some(since));

        // {since}-{started}
        assert!(run.run_key.starts_with("20230101-000000-"));
        assert_eq!(run.run_key.len(), 31);
        assert_eq!(run.since, Some(since));
    }

    #[test]
    fn test_halted_run_reports_zero_items() {
        let mut run = PipelineRun::new(SourceKind::Health);
        run.finish(RunOutcome::Halted {
            reason: HaltReason::NoWork,
        });

        assert!(run.is_halted());
        assert_eq!(run.items_processed(), 0);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_outcome_serialization_distinguishes_halt() {
        let halted = RunOutcome::Halted {
            reason: HaltReason::BatchInProgress,
        };
        let json = serde_json::to_string(&halted).unwrap();
        assert!(json.contains("\"status\":\"halted\""));
        assert!(json.contains("batch_in_progress"));

        let completed = RunOutcome::Completed {
            items_processed: 7,
            summary_location: Some("report/20250101-000000/summary.json".to_string()),
        };
        let json = serde_json::to_string(&completed).unwrap();
        assert!(json.contains("\"status\":\"completed\""));
    }
}

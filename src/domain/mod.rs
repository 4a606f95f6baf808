//! Data structures for the inference pipeline.

pub mod analysis;
pub mod item;
pub mod job;
pub mod run;

pub use analysis::{AdvisorAnalysis, AggregationResult, CaseAnalysis, HealthAnalysis, ItemAnalysis};
pub use item::{
    BatchRecord, ContentBlock, InferenceConfig, Message, ModelInput, SourceKind, SourceRecord,
    WorkItem,
};
pub use job::{Batch, InferenceJob, JobStatus};
pub use run::{HaltReason, PipelineRun, RunOutcome};

//! opslens - operational-event inference pipeline
//!
//! Collects operational records (support cases, health events, advisor
//! findings), turns each into a prompt-bearing work item, and routes the
//! set to the cheapest viable execution path: synchronous invocation for
//! small workloads, asynchronous batch jobs at or above the inflection
//! threshold. Raw model output is reconciled with per-item failure
//! isolation and condensed into exactly one executive summary per run.
//!
//! # Modules
//!
//! - `adapters`: inference backend integrations (HTTP client)
//! - `core`: the pipeline engine (router, executors, reconciler,
//!   aggregator, controller)
//! - `domain`: data structures (WorkItem, Batch, ItemAnalysis, PipelineRun)
//! - `store`: object store abstraction and filesystem implementation
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline over collected case records
//! opslens run --mode cases --input cases.jsonl
//!
//! # Inspect backend batch jobs
//! opslens jobs
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use crate::core::{Dispatch, PipelineController, Reconciler};
pub use domain::{
    Batch, HaltReason, InferenceJob, ItemAnalysis, JobStatus, PipelineRun, RunOutcome, SourceKind,
    SourceRecord, WorkItem,
};
pub use store::{Area, FsObjectStore, ObjectStore};

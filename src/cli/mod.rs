//! Command-line interface for opslens.
//!
//! Provides commands for running the pipeline over collected records,
//! inspecting backend inference jobs, and printing configuration.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{HttpInference, InferenceBackend};
use crate::config;
use crate::core::{BatchJobManager, PipelineController};
use crate::domain::{RunOutcome, SourceKind, SourceRecord};
use crate::store::FsObjectStore;

/// opslens - operational-event inference pipeline
#[derive(Parser, Debug)]
#[command(name = "opslens")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for one source kind
    Run {
        /// Source kind to process
        #[arg(short, long, value_enum)]
        mode: Mode,

        /// Input file of JSONL source records (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read records from stdin
        #[arg(long)]
        stdin: bool,

        /// RFC 3339 cursor the records were collected from; keys the
        /// run's artifacts by the covered interval
        #[arg(long)]
        since: Option<String>,
    },

    /// List backend inference jobs with status counts
    Jobs,

    /// Show resolved configuration (debug)
    Config,
}

/// Source kind for the CLI (maps to SourceKind)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Mode {
    /// Enterprise support cases
    Cases,

    /// Service health events
    Health,

    /// Advisor findings
    Advisor,
}

impl From<Mode> for SourceKind {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Cases => SourceKind::Cases,
            Mode::Health => SourceKind::Health,
            Mode::Advisor => SourceKind::Advisor,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                mode,
                input,
                stdin,
                since,
            } => run_pipeline(mode.into(), input, stdin, since).await,
            Commands::Jobs => list_jobs().await,
            Commands::Config => show_config(),
        }
    }
}

fn backend() -> Result<Arc<dyn InferenceBackend>> {
    let settings = config::settings()?;
    Ok(Arc::new(HttpInference::new(
        settings.endpoint.clone(),
        settings.token.clone(),
    )))
}

/// Parse one JSONL file (or stdin) of source records
fn read_records(input: Option<PathBuf>, use_stdin: bool) -> Result<Vec<SourceRecord>> {
    let body = if let Some(path) = input {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if use_stdin {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        // no input source; run over already-staged items only
        String::new()
    };

    body.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("malformed record on line {}", i + 1))
        })
        .collect()
}

/// Parse the collection cursor as an RFC 3339 timestamp
fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid --since timestamp: {}", raw))
}

/// Run one pipeline pass and print its outcome
async fn run_pipeline(
    mode: SourceKind,
    input: Option<PathBuf>,
    use_stdin: bool,
    since: Option<String>,
) -> Result<()> {
    let settings = config::settings()?;
    let records = read_records(input, use_stdin)?;
    let since = since.as_deref().map(parse_since).transpose()?;

    let controller = PipelineController::new(
        Arc::new(FsObjectStore::new(settings.store_root.clone())),
        backend()?,
        settings.clone(),
    );

    let run = controller.run(mode, records, since).await?;
    match run.outcome {
        Some(RunOutcome::Completed {
            items_processed,
            summary_location,
        }) => {
            println!(
                "{}",
                serde_json::json!({
                    "itemsProcessed": items_processed,
                    "itemsRemaining": run.items_remaining,
                    "summaryLocation": summary_location,
                })
            );
        }
        Some(RunOutcome::Halted { reason }) => {
            println!("halted: {}", reason);
        }
        None => {
            println!("run ended without an outcome");
        }
    }
    Ok(())
}

/// List backend jobs and their status distribution
async fn list_jobs() -> Result<()> {
    let settings = config::settings()?;
    let backend = backend()?;
    let manager = BatchJobManager::new(
        Arc::new(FsObjectStore::new(settings.store_root.clone())),
        Arc::clone(&backend),
        settings.clone(),
    );

    let jobs = backend
        .list_jobs()
        .await
        .context("failed to list inference jobs")?;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for job in &jobs {
        *counts.entry(job.status.to_string()).or_default() += 1;
        println!(
            "{}  {}  {}  submitted {}",
            job.job_id, job.status, job.batch_id, job.submit_time
        );
    }

    println!();
    for (status, count) in &counts {
        println!("{}: {}", status, count);
    }
    println!("outstanding: {}", manager.outstanding_jobs().await?);
    Ok(())
}

/// Print the resolved configuration
fn show_config() -> Result<()> {
    let settings = config::settings()?;

    println!("home:                 {}", settings.home.display());
    println!("store_root:           {}", settings.store_root.display());
    println!("endpoint:             {}", settings.endpoint);
    println!("text_model:           {}", settings.text_model);
    println!("aggregation_model:    {}", settings.aggregation_model);
    println!("inflection_threshold: {}", settings.inflection_threshold);
    println!("poll_interval_secs:   {}", settings.poll_interval_secs);
    println!("max_parallelism:      {}", settings.max_parallelism);
    println!("run_timeout_secs:     {}", settings.run_timeout_secs);
    match &settings.config_file {
        Some(path) => println!("config_file:          {}", path.display()),
        None => println!("config_file:          (defaults)"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_records_parses_jsonl() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"kind": "case", "case_id": "1", "communication": "help"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"kind": "health", "arn": "arn:x", "detail": {{"service": "EC2"}}}}"#
        )
        .unwrap();

        let records = read_records(Some(file.path().to_path_buf()), false).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].natural_key(), "1");
        assert_eq!(records[1].kind(), SourceKind::Health);
    }

    #[test]
    fn test_read_records_rejects_malformed_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        assert!(read_records(Some(file.path().to_path_buf()), false).is_err());
    }

    #[test]
    fn test_no_input_means_empty_record_set() {
        let records = read_records(None, false).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_since_accepts_rfc3339() {
        let t = parse_since("2023-01-01T00:00:00Z").unwrap();
        assert_eq!(t.timestamp(), 1_672_531_200);

        assert!(parse_since("yesterday").is_err());
        assert!(parse_since("20230101-000000").is_err());
    }
}

//! Configuration for opslens.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (OPSLENS_HOME, OPSLENS_STORE_ROOT,
//!    OPSLENS_INFERENCE_ENDPOINT, OPSLENS_INFERENCE_TOKEN)
//! 2. Config file (.opslens/config.yaml)
//! 3. Defaults (~/.opslens)
//!
//! Config file discovery:
//! - Searches current directory and parents for .opslens/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::retry::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<Settings, String>> = OnceLock::new();

/// The sixteen operational categories case analyses are constrained to
pub const CATEGORIES: [&str; 16] = [
    "limit-reached",
    "customer-release",
    "development-issue",
    "customer-networking",
    "throttling",
    "ice-error",
    "feature-request",
    "customer-dependency",
    "aws-release",
    "customer-question",
    "exceeding-capability",
    "lack-monitoring",
    "security-issue",
    "service-event",
    "transient-issues",
    "upgrade-management",
];

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub inference: Option<InferenceConfigFile>,
    #[serde(default)]
    pub dispatch: Option<DispatchConfigFile>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Pipeline state directory (relative to config file)
    pub home: Option<String>,
    /// Object store root (relative to config file)
    pub store_root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfigFile {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub text_model: Option<String>,
    pub aggregation_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfigFile {
    pub inflection_threshold: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub max_parallelism: Option<usize>,
    pub run_timeout_secs: Option<u64>,
}

/// Resolved configuration with absolute paths and all defaults applied
#[derive(Debug, Clone)]
pub struct Settings {
    /// Absolute path to opslens home (run journal, lock file)
    pub home: PathBuf,

    /// Absolute path to the object store root
    pub store_root: PathBuf,

    /// Inference service endpoint
    pub endpoint: String,

    /// Optional bearer token for the inference service
    pub token: Option<String>,

    /// Model used for per-item categorization and summarization
    pub text_model: String,

    /// Model used for the run-level aggregation call
    pub aggregation_model: String,

    /// Item count at or above which work is dispatched as batch jobs
    pub inflection_threshold: usize,

    /// Seconds between batch job status polls
    pub poll_interval_secs: u64,

    /// Concurrent on-demand invocations
    pub max_parallelism: usize,

    /// Wall-clock budget for one pipeline run
    pub run_timeout_secs: u64,

    /// Backend call retry policy
    pub retry: RetryPolicy,

    /// Per-item inference parameters for categorization
    pub categorize_temperature: f64,
    pub categorize_top_p: f64,

    /// Run-level summary inference parameters
    pub summary_temperature: f64,
    pub summary_top_p: f64,

    /// Token cap for per-item responses
    pub max_tokens: u32,

    /// Token cap for the aggregation response
    pub aggregation_max_tokens: u32,

    /// Raw output filenames to ignore during reconciliation
    pub skip_patterns: Vec<String>,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".opslens");
        Self {
            store_root: home.join("store"),
            home,
            endpoint: "http://localhost:8080".to_string(),
            token: None,
            text_model: "us.amazon.nova-micro-v1:0".to_string(),
            aggregation_model: "us.anthropic.claude-3-7-sonnet-20250219-v1:0".to_string(),
            inflection_threshold: 100,
            poll_interval_secs: 60,
            max_parallelism: 1,
            run_timeout_secs: 3600,
            retry: RetryPolicy::default(),
            categorize_temperature: 0.5,
            categorize_top_p: 0.1,
            summary_temperature: 0.3,
            summary_top_p: 0.5,
            max_tokens: 10240,
            aggregation_max_tokens: 131072,
            skip_patterns: vec!["*manifest.json.out".to_string()],
            config_file: None,
        }
    }
}

impl Settings {
    /// Directory holding per-run journals ($OPSLENS_HOME/runs)
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Path of the exclusive run lock file
    pub fn lock_path(&self) -> PathBuf {
        self.runs_dir().join("run.lock")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".opslens").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_settings() -> Result<Settings> {
    let mut settings = Settings::default();

    let config_file = find_config_file();
    if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // home is relative to the .opslens/ directory itself
        let opslens_dir = config_path.parent().unwrap_or(Path::new("."));
        let base_dir = opslens_dir.parent().unwrap_or(Path::new("."));

        if let Some(ref home) = config.paths.home {
            settings.home = resolve_path(opslens_dir, home);
        }
        if let Some(ref root) = config.paths.store_root {
            settings.store_root = resolve_path(base_dir, root);
        } else if config.paths.home.is_some() {
            settings.store_root = settings.home.join("store");
        }

        if let Some(inference) = config.inference {
            if let Some(endpoint) = inference.endpoint {
                settings.endpoint = endpoint;
            }
            settings.token = inference.token;
            if let Some(model) = inference.text_model {
                settings.text_model = model;
            }
            if let Some(model) = inference.aggregation_model {
                settings.aggregation_model = model;
            }
        }

        if let Some(dispatch) = config.dispatch {
            if let Some(threshold) = dispatch.inflection_threshold {
                settings.inflection_threshold = threshold;
            }
            if let Some(secs) = dispatch.poll_interval_secs {
                settings.poll_interval_secs = secs;
            }
            if let Some(n) = dispatch.max_parallelism {
                settings.max_parallelism = n.max(1);
            }
            if let Some(secs) = dispatch.run_timeout_secs {
                settings.run_timeout_secs = secs;
            }
        }

        if let Some(retry) = config.retry {
            settings.retry = retry;
        }
    }

    // Environment variables win over the file
    if let Ok(home) = std::env::var("OPSLENS_HOME") {
        settings.home = PathBuf::from(home);
    }
    if let Ok(root) = std::env::var("OPSLENS_STORE_ROOT") {
        settings.store_root = PathBuf::from(root);
    }
    if let Ok(endpoint) = std::env::var("OPSLENS_INFERENCE_ENDPOINT") {
        settings.endpoint = endpoint;
    }
    if let Ok(token) = std::env::var("OPSLENS_INFERENCE_TOKEN") {
        settings.token = Some(token);
    }

    settings.config_file = config_file;
    Ok(settings)
}

/// Get the global configuration (loads once, then cached)
pub fn settings() -> Result<&'static Settings> {
    let result = CONFIG.get_or_init(|| load_settings().map_err(|e| e.to_string()));

    match result {
        Ok(settings) => Ok(settings),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_settings() -> Result<Settings> {
    load_settings()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.inflection_threshold, 100);
        assert_eq!(settings.poll_interval_secs, 60);
        assert_eq!(settings.run_timeout_secs, 3600);
        assert_eq!(settings.max_tokens, 10240);
        assert_eq!(settings.aggregation_max_tokens, 131072);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.skip_patterns, vec!["*manifest.json.out"]);
    }

    #[test]
    fn test_category_taxonomy() {
        assert_eq!(CATEGORIES.len(), 16);
        assert!(CATEGORIES.contains(&"limit-reached"));
        assert!(CATEGORIES.contains(&"throttling"));
        assert!(CATEGORIES.contains(&"upgrade-management"));
        // all entries are lowercase kebab-case
        assert!(CATEGORIES
            .iter()
            .all(|c| c.chars().all(|ch| ch.is_ascii_lowercase() || ch == '-')));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let opslens_dir = temp.path().join(".opslens");
        std::fs::create_dir_all(&opslens_dir).unwrap();

        let config_path = opslens_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  store_root: ./store
inference:
  endpoint: http://inference.internal:9000
dispatch:
  inflection_threshold: 50
  max_parallelism: 4
retry:
  max_attempts: 3
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));
        let dispatch = config.dispatch.unwrap();
        assert_eq!(dispatch.inflection_threshold, Some(50));
        assert_eq!(dispatch.max_parallelism, Some(4));
        assert_eq!(config.retry.unwrap().max_attempts, 3);
        assert_eq!(
            config.inference.unwrap().endpoint,
            Some("http://inference.internal:9000".to_string())
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_lock_path_under_runs_dir() {
        let settings = Settings::default();
        assert_eq!(settings.lock_path(), settings.runs_dir().join("run.lock"));
    }
}

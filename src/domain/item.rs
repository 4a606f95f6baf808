//! Work items and the records they are derived from.
//!
//! A `WorkItem` is one prompt-plus-parameters unit built from a single
//! source record. Its model input serializes to the JSONL record format
//! the batch inference service consumes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of operational record a work item was derived from.
///
/// The kind drives per-source policy: storage key prefixes, output
/// payload schemas, and whether processed inputs are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Enterprise support cases
    Cases,

    /// Service health events
    Health,

    /// Advisor findings
    Advisor,
}

impl SourceKind {
    /// Prefix used for input-area object keys of this kind
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::Cases => "case-",
            Self::Health => "health-",
            Self::Advisor => "advisor-",
        }
    }

    /// Whether input objects are kept after successful processing.
    ///
    /// Cases are removed once processed; health and advisor records are
    /// retained for audit. This is an explicit policy difference.
    pub fn retain_input(&self) -> bool {
        !matches!(self, Self::Cases)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cases => "cases",
            Self::Health => "health",
            Self::Advisor => "advisor",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw record from one of the source connectors.
///
/// Connectors themselves are out of scope; this is the boundary type
/// they yield. Every record resolves to a stable natural key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRecord {
    Case {
        case_id: String,
        #[serde(default)]
        meta: serde_json::Value,
        communication: String,
    },
    Health {
        arn: String,
        #[serde(default)]
        detail: serde_json::Value,
    },
    Advisor {
        check_id: String,
        #[serde(default)]
        detail: serde_json::Value,
    },
}

impl SourceRecord {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Case { .. } => SourceKind::Cases,
            Self::Health { .. } => SourceKind::Health,
            Self::Advisor { .. } => SourceKind::Advisor,
        }
    }

    /// The record's stable natural key (case id, event ARN, check id)
    pub fn natural_key(&self) -> &str {
        match self {
            Self::Case { case_id, .. } => case_id,
            Self::Health { arn, .. } => arn,
            Self::Advisor { check_id, .. } => check_id,
        }
    }

    /// Check that mandatory fields are present and non-empty.
    ///
    /// Records failing this check are skipped and logged, never fatal.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Case {
                case_id,
                communication,
                ..
            } => !case_id.is_empty() && !communication.is_empty(),
            Self::Health { arn, detail } => !arn.is_empty() && !detail.is_null(),
            Self::Advisor { check_id, detail } => !check_id.is_empty() && !detail.is_null(),
        }
    }
}

/// A single text block within a message or system prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    pub text: String,
}

impl ContentBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One conversation turn sent to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![ContentBlock::new(text)],
        }
    }
}

/// Inference parameters, serialized in the backend's wire casing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

/// The model-facing portion of a work item.
///
/// This is the exact shape written to the input area as one JSONL line
/// (inside a `BatchRecord`) and submitted to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInput {
    pub system: Vec<ContentBlock>,
    pub messages: Vec<Message>,
    pub inference_config: InferenceConfig,
}

/// One JSONL record as consumed by the batch inference service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub record_id: String,
    pub model_input: ModelInput,
}

/// A single prompt+config unit derived from one source record.
///
/// Immutable once created; consumed exactly once by either executor path.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub record_id: String,
    pub source: SourceKind,
    pub natural_key: String,
    pub model_input: ModelInput,
}

impl WorkItem {
    pub fn new(
        source: SourceKind,
        natural_key: impl Into<String>,
        model_input: ModelInput,
    ) -> Self {
        let natural_key = natural_key.into();
        let record_id = format!("opslens-{}", &Uuid::new_v4().simple().to_string()[..12]);
        Self {
            record_id,
            source,
            natural_key,
            model_input,
        }
    }

    /// Input-area object key for this item.
    ///
    /// Keyed by natural key, so a re-collected record overwrites the
    /// queued one (last-write-wins).
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}.jsonl",
            self.source.key_prefix(),
            sanitize(&self.natural_key)
        )
    }

    /// Serialize the model-facing record as one JSONL line
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        let record = BatchRecord {
            record_id: self.record_id.clone(),
            model_input: self.model_input.clone(),
        };
        serde_json::to_string(&record)
    }
}

/// Natural keys may be ARNs; flatten them into safe object-key segments.
pub(crate) fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> ModelInput {
        ModelInput {
            system: vec![ContentBlock::new("You are a reviewer.")],
            messages: vec![Message::user("Categorize this case")],
            inference_config: InferenceConfig {
                temperature: 0.5,
                top_p: 0.1,
                max_tokens: 10240,
            },
        }
    }

    #[test]
    fn test_storage_key_uses_kind_prefix() {
        let item = WorkItem::new(SourceKind::Cases, "12345", sample_input());
        assert_eq!(item.storage_key(), "case-12345.jsonl");

        let item = WorkItem::new(
            SourceKind::Health,
            "arn:aws:health:us-east-1::event/EC2/X",
            sample_input(),
        );
        assert!(item.storage_key().starts_with("health-"));
        assert!(!item.storage_key().contains(':'));
        assert!(!item.storage_key().contains('/'));
    }

    #[test]
    fn test_jsonl_wire_format() {
        let item = WorkItem::new(SourceKind::Cases, "12345", sample_input());
        let line = item.to_jsonl().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert!(value["recordId"].as_str().unwrap().starts_with("opslens-"));
        assert_eq!(value["modelInput"]["inferenceConfig"]["maxTokens"], 10240);
        assert_eq!(value["modelInput"]["inferenceConfig"]["topP"], 0.1);
        assert_eq!(value["modelInput"]["messages"][0]["role"], "user");
    }

    #[test]
    fn test_incomplete_records_detected() {
        let record = SourceRecord::Case {
            case_id: "".to_string(),
            meta: serde_json::Value::Null,
            communication: "body".to_string(),
        };
        assert!(!record.is_complete());

        let record = SourceRecord::Case {
            case_id: "100".to_string(),
            meta: serde_json::json!({"status": "RESOLVED"}),
            communication: "body".to_string(),
        };
        assert!(record.is_complete());
    }

    #[test]
    fn test_retention_policy_by_kind() {
        assert!(!SourceKind::Cases.retain_input());
        assert!(SourceKind::Health.retain_input());
        assert!(SourceKind::Advisor.retain_input());
    }
}

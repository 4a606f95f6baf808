//! Turning raw source records into staged work items.
//!
//! Each record becomes one prompt-plus-parameters unit: a per-source
//! persona, the fixed category list (with descriptions and worked
//! examples loaded from the store's category area), the record body,
//! and an explicit JSON output-schema contract. Incomplete records are
//! skipped with a warning, never fatal.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::{Settings, CATEGORIES};
use crate::domain::{
    ContentBlock, InferenceConfig, Message, ModelInput, SourceKind, SourceRecord, WorkItem,
};
use crate::store::{Area, ObjectStore};

/// Persona line opening the system prompt for each source kind
fn persona(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Cases => {
            "You are a technical account manager reviewing enterprise support cases. \
             You categorize each case, summarize it, and judge customer sentiment."
        }
        SourceKind::Health => {
            "You are a site reliability engineering manager reviewing service health \
             events. You summarize each event and its operational impact."
        }
        SourceKind::Advisor => {
            "You are a cost and resilience reviewer examining advisor findings. \
             You summarize each finding and the action it calls for."
        }
    }
}

/// Output-schema contract appended to the system prompt, per kind.
///
/// Field names here must match the deserialization schema exactly.
fn output_contract(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Cases => {
            r#"Respond with a single JSON object and nothing else, with exactly these fields:
{"caseId": string, "displayId": string, "status": string, "serviceCode": string, "category": string, "category_explanation": string, "case_summary": string, "sentiment": "Positive"|"Neutral"|"Negative", "suggested_action": string, "suggestion_link": string}"#
        }
        SourceKind::Health => {
            r#"Respond with a single JSON object and nothing else, with exactly these fields:
{"arn": string, "service": string, "eventTypeCode": string, "statusCode": string, "event_summary": string, "suggestion_action": string, "suggestion_link": string}"#
        }
        SourceKind::Advisor => {
            r#"Respond with a single JSON object and nothing else, with exactly these fields:
{"checkId": string, "checkName": string, "status": string, "event_summary": string, "suggestion_action": string, "suggestion_link": string}"#
        }
    }
}

/// Result of staging a set of records
#[derive(Debug, Clone)]
pub struct CollectResult {
    /// Input-area keys of the staged items
    pub keys: Vec<String>,

    /// Records seen, including skipped ones
    pub total: usize,

    /// Records skipped for missing mandatory fields
    pub skipped: usize,
}

/// Builds prompts and stages work items into the input area
pub struct Normalizer {
    store: Arc<dyn ObjectStore>,
    settings: Settings,
}

impl Normalizer {
    pub fn new(store: Arc<dyn ObjectStore>, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Assemble the category section of the system prompt.
    ///
    /// Descriptions and worked examples live in the category area as
    /// `categories/{name}.txt`; a missing file degrades to the bare
    /// category name.
    async fn category_section(&self) -> String {
        let mut section = String::from("Choose the category from this list only:\n");
        for name in CATEGORIES {
            match self.store.get(&Area::Categories.key(&format!("{}.txt", name))).await {
                Ok(body) => {
                    section.push_str(&format!("- {}: {}\n", name, body.trim()));
                }
                Err(_) => {
                    debug!(category = name, "no description in category area");
                    section.push_str(&format!("- {}\n", name));
                }
            }
        }
        section
    }

    /// Build the work item for one record, or None if it is incomplete
    pub async fn normalize(&self, record: &SourceRecord) -> Result<Option<WorkItem>> {
        if !record.is_complete() {
            warn!(
                kind = %record.kind(),
                key = record.natural_key(),
                "skipping record with missing mandatory fields"
            );
            return Ok(None);
        }

        let kind = record.kind();
        let mut system = format!("{}\n\n", persona(kind));
        if kind == SourceKind::Cases {
            system.push_str(&self.category_section().await);
            system.push('\n');
        }
        system.push_str(output_contract(kind));

        let body = serde_json::to_string_pretty(record)?;
        let model_input = ModelInput {
            system: vec![ContentBlock::new(system)],
            messages: vec![Message::user(body)],
            inference_config: InferenceConfig {
                temperature: self.settings.categorize_temperature,
                top_p: self.settings.categorize_top_p,
                max_tokens: self.settings.max_tokens,
            },
        };

        Ok(Some(WorkItem::new(kind, record.natural_key(), model_input)))
    }

    /// Normalize and persist a set of records into the input area.
    ///
    /// Items are keyed by natural key, so re-collecting a record
    /// overwrites its queued predecessor (last-write-wins).
    pub async fn collect(&self, records: &[SourceRecord]) -> Result<CollectResult> {
        let mut keys = Vec::new();
        let mut skipped = 0usize;

        for record in records {
            match self.normalize(record).await? {
                Some(item) => {
                    let key = Area::Input.key(&item.storage_key());
                    self.store.put(&key, &item.to_jsonl()?).await?;
                    keys.push(key);
                }
                None => skipped += 1,
            }
        }

        info!(
            staged = keys.len(),
            skipped,
            total = records.len(),
            "collected work items"
        );
        Ok(CollectResult {
            keys,
            total: records.len(),
            skipped,
        })
    }

    /// List input-area keys already staged for one source kind
    pub async fn census(&self, kind: SourceKind) -> Result<Vec<String>> {
        self.store
            .list(&Area::Input.key(kind.key_prefix()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;
    use tempfile::TempDir;

    fn normalizer(dir: &TempDir) -> Normalizer {
        let store = Arc::new(FsObjectStore::new(dir.path()));
        Normalizer::new(store, Settings::default())
    }

    fn case(id: &str) -> SourceRecord {
        SourceRecord::Case {
            case_id: id.to_string(),
            meta: serde_json::json!({"status": "resolved"}),
            communication: "Instance would not start after resize.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_normalize_builds_prompt_with_contract() {
        let dir = TempDir::new().unwrap();
        let item = normalizer(&dir)
            .normalize(&case("170012345"))
            .await
            .unwrap()
            .unwrap();

        let system = &item.model_input.system[0].text;
        assert!(system.contains("technical account manager"));
        assert!(system.contains("throttling"));
        assert!(system.contains("case_summary"));
        assert_eq!(item.model_input.inference_config.temperature, 0.5);
        assert_eq!(item.model_input.inference_config.max_tokens, 10240);
    }

    #[tokio::test]
    async fn test_category_descriptions_embedded_when_present() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path()));
        store
            .put(
                "categories/throttling.txt",
                "API rate limit errors. Example: RunInstances RequestLimitExceeded.",
            )
            .await
            .unwrap();

        let normalizer = Normalizer::new(store, Settings::default());
        let item = normalizer.normalize(&case("1")).await.unwrap().unwrap();
        assert!(item.model_input.system[0]
            .text
            .contains("RequestLimitExceeded"));
    }

    #[tokio::test]
    async fn test_incomplete_record_skipped() {
        let dir = TempDir::new().unwrap();
        let record = SourceRecord::Case {
            case_id: "1".to_string(),
            meta: serde_json::Value::Null,
            communication: String::new(),
        };
        assert!(normalizer(&dir).normalize(&record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_collect_stages_and_counts() {
        let dir = TempDir::new().unwrap();
        let n = normalizer(&dir);

        let records = vec![
            case("1"),
            case("2"),
            SourceRecord::Case {
                case_id: String::new(),
                meta: serde_json::Value::Null,
                communication: "x".to_string(),
            },
        ];

        let result = n.collect(&records).await.unwrap();
        assert_eq!(result.keys.len(), 2);
        assert_eq!(result.total, 3);
        assert_eq!(result.skipped, 1);

        let staged = n.census(SourceKind::Cases).await.unwrap();
        assert_eq!(staged, vec!["input/case-1.jsonl", "input/case-2.jsonl"]);
    }

    #[tokio::test]
    async fn test_collect_is_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let n = normalizer(&dir);

        n.collect(&[case("1")]).await.unwrap();
        n.collect(&[case("1")]).await.unwrap();

        let staged = n.census(SourceKind::Cases).await.unwrap();
        assert_eq!(staged.len(), 1);
    }
}

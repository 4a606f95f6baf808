//! Validated per-item model output and the run-level aggregation result.
//!
//! Each source kind has its own output schema, modeled as a variant per
//! kind with a shared `(id, status, summary text)` projection used when
//! building the aggregation buffer.

use serde::{Deserialize, Serialize};

use super::item::SourceKind;

/// Model output for one support case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseAnalysis {
    #[serde(rename = "caseId")]
    pub case_id: serde_json::Value,

    #[serde(rename = "displayId", default)]
    pub display_id: Option<serde_json::Value>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(rename = "serviceCode", default)]
    pub service_code: Option<String>,

    pub category: String,

    #[serde(default)]
    pub category_explanation: Option<String>,

    pub case_summary: String,

    pub sentiment: String,

    #[serde(default)]
    pub suggested_action: Option<String>,

    #[serde(default)]
    pub suggestion_link: Option<String>,
}

/// Model output for one health event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAnalysis {
    pub arn: String,

    #[serde(default)]
    pub service: Option<String>,

    #[serde(rename = "eventTypeCode", default)]
    pub event_type_code: Option<String>,

    #[serde(rename = "statusCode", default)]
    pub status_code: Option<String>,

    pub event_summary: String,

    #[serde(default)]
    pub suggestion_action: Option<String>,

    #[serde(default)]
    pub suggestion_link: Option<String>,
}

/// Model output for one advisor finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorAnalysis {
    #[serde(rename = "checkId")]
    pub check_id: String,

    #[serde(rename = "checkName", default)]
    pub check_name: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    pub event_summary: String,

    #[serde(default)]
    pub suggestion_action: Option<String>,

    #[serde(default)]
    pub suggestion_link: Option<String>,
}

/// A validated per-item result, tagged by its source kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemAnalysis {
    Cases(CaseAnalysis),
    Health(HealthAnalysis),
    Advisor(AdvisorAnalysis),
}

impl ItemAnalysis {
    /// Validate a payload against the schema for `kind`
    pub fn from_value(kind: SourceKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            SourceKind::Cases => Self::Cases(serde_json::from_value(value)?),
            SourceKind::Health => Self::Health(serde_json::from_value(value)?),
            SourceKind::Advisor => Self::Advisor(serde_json::from_value(value)?),
        })
    }

    /// The item's identifier in its source system
    pub fn id(&self) -> String {
        match self {
            // the model sometimes returns numeric case ids
            Self::Cases(c) => match &c.case_id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::Health(h) => h.arn.clone(),
            Self::Advisor(a) => a.check_id.clone(),
        }
    }

    /// Free-text summary for the aggregation buffer
    pub fn summary_text(&self) -> &str {
        match self {
            Self::Cases(c) => &c.case_summary,
            Self::Health(h) => &h.event_summary,
            Self::Advisor(a) => &a.event_summary,
        }
    }

    /// The per-kind key field shown alongside the id in the buffer
    fn key_field(&self) -> (&'static str, String) {
        match self {
            Self::Cases(c) => ("sentiment", c.sentiment.clone()),
            Self::Health(h) => ("status", h.status_code.clone().unwrap_or_default()),
            Self::Advisor(a) => ("status", a.status.clone().unwrap_or_default()),
        }
    }

    /// Condensed text fragment appended to the aggregation buffer
    pub fn fragment(&self) -> String {
        let (field, value) = self.key_field();
        format!(
            "event: {}\n{}: {}\n{}\n\n",
            self.id(),
            field,
            value,
            self.summary_text()
        )
    }
}

/// Single summary record produced once per pipeline run.
///
/// Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub summary: String,
    pub plan: String,
}

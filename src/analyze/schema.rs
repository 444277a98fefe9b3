// src/analyze/schema.rs
//! Structured enrichment result and the JSON-schema contract the inference backend
//! is held to.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Keys every inference response must carry before it is accepted (and cached).
pub const REQUIRED_KEYS: &[&str] = &[
    "core_themes",
    "theme_categories",
    "overall_sentiment",
    "framing",
    "named_entities",
    "one_sentence_summary",
];

pub const MIN_THEMES: usize = 3;
pub const MAX_THEMES: usize = 5;
pub const MAX_ENTITIES: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ThemeCategory {
    #[serde(rename = "Political Issues")]
    Political,
    #[serde(rename = "Social Issues")]
    Social,
    #[serde(rename = "Economic Topics")]
    Economic,
    #[serde(rename = "Cultural Topics")]
    Cultural,
    #[serde(rename = "International Affairs")]
    International,
    #[serde(rename = "Technology & Science")]
    TechnologyScience,
    Other,
}

impl ThemeCategory {
    pub const ALL: [&'static str; 7] = [
        "Political Issues",
        "Social Issues",
        "Economic Topics",
        "Cultural Topics",
        "International Affairs",
        "Technology & Science",
        "Other",
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

impl Sentiment {
    pub const ALL: [&'static str; 4] = ["Positive", "Neutral", "Negative", "Mixed"];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    Favorable,
    Critical,
    Neutral,
    Alarmist,
}

impl Framing {
    pub const ALL: [&'static str; 4] = ["favorable", "critical", "neutral", "alarmist"];
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Analysis {
    pub core_themes: Vec<String>,
    pub theme_categories: Vec<ThemeCategory>,
    pub overall_sentiment: Sentiment,
    pub framing: Framing,
    pub named_entities: Vec<String>,
    pub one_sentence_summary: String,
}

/// `response_format` payload for OpenAI-compatible backends (strict json_schema).
pub fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "video_analysis",
            "strict": true,
            "schema": analysis_schema(),
        }
    })
}

pub fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": REQUIRED_KEYS,
        "properties": {
            "core_themes": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": MIN_THEMES,
                "maxItems": MAX_THEMES,
                "description": "3 to 5 short topics discussed in the video"
            },
            "theme_categories": {
                "type": "array",
                "items": { "type": "string", "enum": ThemeCategory::ALL },
                "description": "One category per theme, same order as core_themes"
            },
            "overall_sentiment": { "type": "string", "enum": Sentiment::ALL },
            "framing": { "type": "string", "enum": Framing::ALL },
            "named_entities": {
                "type": "array",
                "items": { "type": "string" },
                "maxItems": MAX_ENTITIES
            },
            "one_sentence_summary": { "type": "string" }
        }
    })
}

/// Models sometimes wrap JSON in markdown fences even when asked not to.
pub fn strip_code_fences(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse and check a raw model response. Anything short of a well-formed object with
/// every required key and in-range values is `InvalidOutput`.
pub fn validate_response(raw: &str) -> Result<Analysis> {
    let value: Value = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| Error::InvalidOutput(format!("not JSON: {e}")))?;
    validate_value(&value)
}

pub fn validate_value(value: &Value) -> Result<Analysis> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidOutput("response is not a JSON object".into()))?;
    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(Error::InvalidOutput(format!(
            "missing keys: {}",
            missing.join(", ")
        )));
    }

    let analysis: Analysis = serde_json::from_value(value.clone())
        .map_err(|e| Error::InvalidOutput(e.to_string()))?;

    let themes = analysis.core_themes.len();
    if !(MIN_THEMES..=MAX_THEMES).contains(&themes) {
        return Err(Error::InvalidOutput(format!(
            "expected {MIN_THEMES}-{MAX_THEMES} themes, got {themes}"
        )));
    }
    if analysis.theme_categories.len() != themes {
        return Err(Error::InvalidOutput(format!(
            "expected one category per theme ({themes}), got {}",
            analysis.theme_categories.len()
        )));
    }
    if analysis.named_entities.len() > MAX_ENTITIES {
        return Err(Error::InvalidOutput(format!(
            "at most {MAX_ENTITIES} entities allowed, got {}",
            analysis.named_entities.len()
        )));
    }
    if analysis.one_sentence_summary.trim().is_empty() {
        return Err(Error::InvalidOutput("empty summary".into()));
    }
    Ok(analysis)
}

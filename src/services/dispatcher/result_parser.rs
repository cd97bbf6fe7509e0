//! Structured final result reported by a task session.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

/// Second message of every task: how to report the outcome.
pub const RESULT_SCHEMA_PROMPT: &str = r#"When you have finished the task, reply with a final message containing only a JSON object in a ```json fenced block, using exactly this schema:

{
  "status": "complete" | "partial" | "failed" | "blocked",
  "files_changed": ["relative/path", ...],
  "summary": "one paragraph describing what you did",
  "blockers": ["anything that prevented completion"]
}

Commit your work in the current working directory before replying. Do not push."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Complete,
    Partial,
    Failed,
    Blocked,
}

impl ResultStatus {
    /// `complete` and `partial` count as success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete | Self::Partial)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredResult {
    pub status: ResultStatus,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub blockers: Vec<String>,
}

impl StructuredResult {
    /// Error text for an unsuccessful result.
    pub fn failure_reason(&self) -> String {
        let mut reason = format!("task reported {}", self.status.as_str());
        if !self.summary.is_empty() {
            reason.push_str(&format!(": {}", self.summary));
        }
        if !self.blockers.is_empty() {
            reason.push_str(&format!(" (blockers: {})", self.blockers.join("; ")));
        }
        reason
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResultParseError {
    #[error("session produced no final message")]
    Empty,

    #[error("no JSON object with a \"status\" field found in final message")]
    NoJson,

    #[error("result JSON does not match the schema: {0}")]
    Schema(String),
}

fn fenced_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n(.*?)```").expect("fenced block pattern is valid")
    })
}

/// Extract and validate the structured result from a final message.
///
/// Fenced blocks are preferred (last one wins); otherwise the last JSON object
/// in the text that carries a `status` field is used.
pub fn parse_result(text: &str) -> Result<StructuredResult, ResultParseError> {
    if text.trim().is_empty() {
        return Err(ResultParseError::Empty);
    }

    let candidate = fenced_block()
        .captures_iter(text)
        .filter_map(|c| serde_json::from_str::<Value>(c[1].trim()).ok())
        .filter(has_status)
        .last()
        .or_else(|| last_status_object(text))
        .ok_or(ResultParseError::NoJson)?;

    serde_json::from_value(candidate).map_err(|e| ResultParseError::Schema(e.to_string()))
}

fn has_status(value: &Value) -> bool {
    value.get("status").is_some()
}

/// Scan object starts from the end; the first one that parses and has a
/// `status` field wins. Trailing prose after the object is allowed.
fn last_status_object(text: &str) -> Option<Value> {
    text.match_indices('{')
        .map(|(i, _)| i)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .find_map(|start| {
            let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) if value.is_object() && has_status(&value) => Some(value),
                _ => None,
            }
        })
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook dispatcher used before initialization")]
    NotInitialized,
}

/// One configured hook: a matcher against `event.tool`, the sandboxed
/// command string to run, and optional identity/output-shaping hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDefinition {
    pub matcher: String,
    pub command: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
}

impl HookDefinition {
    /// Unique identity for circuit-breaker keying: the configured `id` if
    /// present, else `"<eventType>-<matcher>"`.
    pub fn hook_id(&self, event_type: &str) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{event_type}-{}", self.matcher),
        }
    }
}

/// An incoming tool/agent event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of running a single matched hook, or the aggregate of several.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum HookResult {
    Single(SingleHookResult),
    Aggregate { results: Vec<SingleHookResult> },
}

#[derive(Debug, Clone, Serialize)]
pub struct SingleHookResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SingleHookResult {
    pub fn success(output: String, error: String, parsed: Option<Value>, parse_error: Option<String>) -> Self {
        Self {
            output: Some(output),
            error: Some(error),
            exit_code: Some(0),
            parsed,
            parse_error,
            skipped: false,
            reason: None,
        }
    }

    pub fn failure(output: String, error: String, exit_code: i32, parsed: Option<Value>, parse_error: Option<String>) -> Self {
        Self {
            output: Some(output),
            error: Some(error),
            exit_code: Some(exit_code),
            parsed,
            parse_error,
            skipped: false,
            reason: None,
        }
    }

    pub fn skipped_circuit_open() -> Self {
        Self {
            output: None,
            error: None,
            exit_code: None,
            parsed: None,
            parse_error: None,
            skipped: true,
            reason: Some("Circuit breaker open".to_string()),
        }
    }

    pub fn error_only(message: String) -> Self {
        Self {
            output: None,
            error: Some(message),
            exit_code: Some(1),
            parsed: None,
            parse_error: None,
            skipped: false,
            reason: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.exit_code, Some(code) if code != 0)
    }
}

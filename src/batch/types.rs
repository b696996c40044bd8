use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of work enqueued for the batch processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub data: Value,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub retry_count: u32,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, item_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            item_type: item_type.into(),
            data,
            priority: None,
            retry_count: 0,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Per-item result returned by a [`super::BatchProcessorFn`] call, aligned
/// by index to the input slice.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

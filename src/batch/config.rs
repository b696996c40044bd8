use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::types::BatchItem;

/// Caller-supplied ordering applied to the *entire* queue before a batch is
/// sliced from the head. Stable only to the degree the comparator returns
/// `Equal` for ties.
pub type PriorityComparator = Arc<dyn Fn(&BatchItem, &BatchItem) -> Ordering + Send + Sync>;

/// Configuration for one [`super::BatchProcessor`] queue.
#[derive(Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_queue_size: usize,
    pub retry_limit: u32,
    pub processing_interval: Duration,
    pub flush_on_stop: bool,
    pub priority_comparator: Option<PriorityComparator>,
    pub type_batch_sizes: Option<HashMap<String, usize>>,
}

impl std::fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchConfig")
            .field("batch_size", &self.batch_size)
            .field("max_queue_size", &self.max_queue_size)
            .field("retry_limit", &self.retry_limit)
            .field("processing_interval", &self.processing_interval)
            .field("flush_on_stop", &self.flush_on_stop)
            .field("priority_comparator", &self.priority_comparator.is_some())
            .field("type_batch_sizes", &self.type_batch_sizes)
            .finish()
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_queue_size: 1_000,
            retry_limit: 3,
            processing_interval: Duration::from_millis(1_000),
            flush_on_stop: false,
            priority_comparator: None,
            type_batch_sizes: None,
        }
    }
}

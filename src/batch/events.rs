use super::types::BatchItem;

/// Lifecycle signals emitted by the drain loop. Subscribers receive these
/// via [`super::BatchProcessor::subscribe`] — a typed enum instead of
/// stringly-typed event names.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    BatchStart { batch_size: usize },
    BatchComplete { processed: usize, succeeded: usize, failed: usize },
    ItemProcessed { id: String },
    ItemFailed { item: BatchItem, error: String, attempts: u32 },
    ProcessorError { error: String, batch: Vec<BatchItem> },
}

/// Monotonic counters plus a snapshot of the live queue. See
/// [`super::BatchProcessor::get_statistics`].
#[derive(Debug, Clone, Default)]
pub struct BatchStatistics {
    pub succeeded: u64,
    pub failed: u64,
    pub total_processed: u64,
    pub queue_length: usize,
    pub running: bool,
    pub processing: bool,
}

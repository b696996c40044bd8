//! Asynchronous, priority-aware, retry-bounded queue drainer.
//!
//! Producers call [`BatchProcessor::add`]/[`BatchProcessor::add_batch`];
//! a scheduled [`BatchProcessor::drain`] invokes the caller-supplied
//! [`BatchProcessorFn`] on chunks taken from the queue head, retrying
//! failed items up to a configured cap and re-queuing an entire batch at
//! the head if the processor itself errors out.

mod config;
mod events;
mod processor;
mod types;

pub use config::{BatchConfig, PriorityComparator};
pub use events::{BatchEvent, BatchStatistics};
pub use processor::{BatchProcessor, BatchProcessorFn};
pub use types::{BatchItem, ItemOutcome};

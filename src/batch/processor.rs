use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type SchedulerSlot = std::sync::Mutex<Option<JoinHandle<()>>>;

use super::config::BatchConfig;
use super::events::{BatchEvent, BatchStatistics};
use super::types::{BatchItem, ItemOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Caller-supplied work function invoked on each batch slice. A `process`
/// call that returns `Err` is the "processor exception" path — it never
/// panics the drain loop, it re-queues the whole batch at the head and
/// emits [`BatchEvent::ProcessorError`].
#[async_trait]
pub trait BatchProcessorFn: Send + Sync {
    async fn process(&self, items: &[BatchItem]) -> Result<Vec<ItemOutcome>, String>;
}

struct Stats {
    succeeded: u64,
    failed: u64,
    total_processed: u64,
}

/// Async, priority-aware, retry-bounded queue drainer.
pub struct BatchProcessor {
    config: BatchConfig,
    queue: Mutex<VecDeque<BatchItem>>,
    in_progress: AtomicBool,
    running: AtomicBool,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_processed: AtomicU64,
    events: broadcast::Sender<BatchEvent>,
    processor: Arc<dyn BatchProcessorFn>,
    scheduler: SchedulerSlot,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig, processor: Arc<dyn BatchProcessorFn>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            in_progress: AtomicBool::new(false),
            running: AtomicBool::new(false),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            events: tx,
            processor,
            scheduler: std::sync::Mutex::new(None),
        })
    }

    /// Subscribe to the public signalling surface.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: BatchEvent) {
        // No subscribers is not an error — events are fire-and-forget.
        let _ = self.events.send(event);
    }

    /// Enqueue one item, initializing `retry_count` if unset. Returns
    /// `false` (no error) when the queue is already at `max_queue_size`.
    pub async fn add(&self, item: BatchItem) -> bool {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.config.max_queue_size {
            return false;
        }
        queue.push_back(item);
        true
    }

    /// `add` each item in order, preserving per-item outcome order.
    pub async fn add_batch(&self, items: Vec<BatchItem>) -> Vec<bool> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(self.add(item).await);
        }
        results
    }

    /// Current queue length.
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Schedule `drain()` every `processing_interval`. A tick that lands
    /// while a drain is already running is a no-op — no ticks accumulate.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let interval = self.config.processing_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                this.drain().await;
            }
        });
        *self.scheduler.lock().unwrap() = Some(handle);
    }

    /// Cancel scheduling, await any in-progress drain, and perform one
    /// final drain if `flush_on_stop` is set.
    pub async fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.scheduler.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        while self.in_progress.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.config.flush_on_stop {
            self.drain().await;
        }
    }

    /// One drain cycle: size and (optionally priority-sort) a batch from
    /// the queue head, hand it to the processor, and apply retry/backlog
    /// rules to the outcome.
    pub async fn drain(&self) {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let batch = {
            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                self.in_progress.store(false, Ordering::SeqCst);
                return;
            }
            if let Some(comparator) = &self.config.priority_comparator {
                let mut items: Vec<BatchItem> = queue.drain(..).collect();
                items.sort_by(|a, b| comparator(a, b));
                *queue = items.into();
            }
            take_batch(&mut queue, &self.config)
        };

        if batch.is_empty() {
            self.in_progress.store(false, Ordering::SeqCst);
            return;
        }

        self.emit(BatchEvent::BatchStart { batch_size: batch.len() });
        debug!(batch_size = batch.len(), "draining batch");

        match self.processor.process(&batch).await {
            Ok(outcomes) => self.apply_outcomes(batch, outcomes).await,
            Err(error) => {
                error!(error = %error, "batch processor returned an error, re-queuing batch at head");
                let mut queue = self.queue.lock().await;
                for item in batch.iter().rev() {
                    queue.push_front(item.clone());
                }
                drop(queue);
                self.emit(BatchEvent::ProcessorError { error, batch });
            }
        }

        self.in_progress.store(false, Ordering::SeqCst);
    }

    async fn apply_outcomes(&self, batch: Vec<BatchItem>, outcomes: Vec<ItemOutcome>) {
        let mut succeeded = 0u64;
        let mut failed = 0u64;
        let mut requeue = Vec::new();

        for (mut item, outcome) in batch.into_iter().zip(outcomes.into_iter()) {
            if outcome.success {
                succeeded += 1;
                self.emit(BatchEvent::ItemProcessed { id: outcome.id });
            } else {
                failed += 1;
                item.retry_count += 1;
                if item.retry_count <= self.config.retry_limit {
                    requeue.push(item);
                } else {
                    self.emit(BatchEvent::ItemFailed {
                        attempts: item.retry_count,
                        error: outcome.error.unwrap_or_default(),
                        item,
                    });
                }
            }
        }

        let processed = succeeded + failed;
        self.succeeded.fetch_add(succeeded, Ordering::SeqCst);
        self.failed.fetch_add(failed, Ordering::SeqCst);
        self.total_processed.fetch_add(processed, Ordering::SeqCst);

        if !requeue.is_empty() {
            let mut queue = self.queue.lock().await;
            queue.extend(requeue);
        }

        self.emit(BatchEvent::BatchComplete {
            processed: processed as usize,
            succeeded: succeeded as usize,
            failed: failed as usize,
        });
    }

    pub async fn get_statistics(&self) -> BatchStatistics {
        BatchStatistics {
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            total_processed: self.total_processed.load(Ordering::SeqCst),
            queue_length: self.queue.lock().await.len(),
            running: self.running.load(Ordering::SeqCst),
            processing: self.in_progress.load(Ordering::SeqCst),
        }
    }

    pub fn reset_statistics(&self) {
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.total_processed.store(0, Ordering::SeqCst);
    }
}

/// Batch sizing: either a flat `batch_size` off the head, or — when
/// `type_batch_sizes` is configured — the longest
/// leading run of the head item's type, capped at that type's configured
/// size (falling back to `batch_size`).
fn take_batch(queue: &mut VecDeque<BatchItem>, config: &BatchConfig) -> Vec<BatchItem> {
    let take_n = match &config.type_batch_sizes {
        None => config.batch_size.min(queue.len()),
        Some(sizes) => {
            let head_type = &queue[0].item_type;
            let run_length = queue.iter().take_while(|i| &i.item_type == head_type).count();
            let cap = sizes.get(head_type).copied().unwrap_or(config.batch_size);
            cap.min(run_length)
        }
    };
    queue.drain(..take_n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct AlwaysSucceeds;

    #[async_trait]
    impl BatchProcessorFn for AlwaysSucceeds {
        async fn process(&self, items: &[BatchItem]) -> Result<Vec<ItemOutcome>, String> {
            Ok(items.iter().map(|i| ItemOutcome::ok(i.id.clone())).collect())
        }
    }

    struct FailsThenSucceeds {
        fail_id: String,
        attempts: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl BatchProcessorFn for FailsThenSucceeds {
        async fn process(&self, items: &[BatchItem]) -> Result<Vec<ItemOutcome>, String> {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if item.id == self.fail_id
                    && self.attempts.fetch_add(1, Ordering::SeqCst) < self.fail_times
                {
                    out.push(ItemOutcome::failed(item.id.clone(), "boom"));
                } else {
                    out.push(ItemOutcome::ok(item.id.clone()));
                }
            }
            Ok(out)
        }
    }

    struct AlwaysErrors;

    #[async_trait]
    impl BatchProcessorFn for AlwaysErrors {
        async fn process(&self, _items: &[BatchItem]) -> Result<Vec<ItemOutcome>, String> {
            Err("processor blew up".to_string())
        }
    }

    fn item(id: &str) -> BatchItem {
        BatchItem::new(id, "t", json!({}))
    }

    #[tokio::test]
    async fn add_rejects_when_queue_full() {
        let config = BatchConfig {
            max_queue_size: 1,
            ..BatchConfig::default()
        };
        let processor = BatchProcessor::new(config, Arc::new(AlwaysSucceeds));
        assert!(processor.add(item("a")).await);
        assert!(!processor.add(item("b")).await);
    }

    #[tokio::test]
    async fn drain_processes_and_reports_success() {
        let config = BatchConfig {
            batch_size: 10,
            ..BatchConfig::default()
        };
        let processor = BatchProcessor::new(config, Arc::new(AlwaysSucceeds));
        processor.add_batch(vec![item("a"), item("b")]).await;
        processor.drain().await;
        let stats = processor.get_statistics().await;
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.queue_length, 0);
    }

    #[tokio::test]
    async fn retry_limit_bounds_reprocessing_then_item_failed() {
        let config = BatchConfig {
            batch_size: 10,
            retry_limit: 1,
            ..BatchConfig::default()
        };
        let processor = BatchProcessor::new(
            config,
            Arc::new(FailsThenSucceeds {
                fail_id: "b".to_string(),
                attempts: AtomicUsize::new(0),
                fail_times: 10,
            }),
        );
        let mut rx = processor.subscribe();
        processor.add_batch(vec![item("a"), item("b")]).await;

        processor.drain().await; // a succeeds, b fails (retry 1 <= limit 1) -> requeued
        processor.drain().await; // b fails again (retry 2 > limit 1) -> ItemFailed

        let stats = processor.get_statistics().await;
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 2);

        let mut saw_item_failed = false;
        while let Ok(event) = rx.try_recv() {
            if let BatchEvent::ItemFailed { item, attempts, .. } = event {
                assert_eq!(item.id, "b");
                assert_eq!(attempts, 2);
                saw_item_failed = true;
            }
        }
        assert!(saw_item_failed);
    }

    #[tokio::test]
    async fn processor_error_requeues_batch_at_head_in_order() {
        let config = BatchConfig {
            batch_size: 10,
            ..BatchConfig::default()
        };
        let processor = BatchProcessor::new(config, Arc::new(AlwaysErrors));
        processor.add_batch(vec![item("a"), item("b")]).await;
        processor.drain().await;

        let queue = processor.queue.lock().await;
        let ids: Vec<&str> = queue.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn type_batch_sizes_cap_the_leading_run() {
        use std::collections::HashMap;
        let mut sizes = HashMap::new();
        sizes.insert("urgent".to_string(), 1usize);
        let config = BatchConfig {
            batch_size: 10,
            type_batch_sizes: Some(sizes),
            ..BatchConfig::default()
        };
        let processor = BatchProcessor::new(config, Arc::new(AlwaysSucceeds));
        processor
            .add_batch(vec![
                BatchItem::new("a", "urgent", json!({})),
                BatchItem::new("b", "urgent", json!({})),
                BatchItem::new("c", "normal", json!({})),
            ])
            .await;
        processor.drain().await;
        let stats = processor.get_statistics().await;
        assert_eq!(stats.succeeded, 1);
        assert_eq!(processor.queue_len().await, 2);
    }

    #[tokio::test]
    async fn priority_comparator_sorts_whole_queue_before_slicing() {
        let config = BatchConfig {
            batch_size: 1,
            priority_comparator: Some(Arc::new(|a: &BatchItem, b: &BatchItem| {
                b.priority.unwrap_or(0).cmp(&a.priority.unwrap_or(0))
            })),
            ..BatchConfig::default()
        };
        let processor = BatchProcessor::new(config, Arc::new(AlwaysSucceeds));
        processor
            .add_batch(vec![
                BatchItem::new("a", "t", json!({})).with_priority(1),
                BatchItem::new("b", "t", json!({})).with_priority(3),
                BatchItem::new("c", "t", json!({})).with_priority(2),
            ])
            .await;
        processor.drain().await; // highest priority (b) goes first
        let remaining: Vec<String> = processor
            .queue
            .lock()
            .await
            .iter()
            .map(|i| i.id.clone())
            .collect();
        assert_eq!(remaining, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn start_stop_drains_on_a_schedule_and_flushes() {
        let config = BatchConfig {
            batch_size: 10,
            processing_interval: Duration::from_millis(20),
            flush_on_stop: true,
            ..BatchConfig::default()
        };
        let processor = BatchProcessor::new(config, Arc::new(AlwaysSucceeds));
        processor.add(item("a")).await;
        processor.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        processor.add(item("b")).await;
        processor.stop().await;

        let stats = processor.get_statistics().await;
        assert_eq!(stats.succeeded, 2);
        assert!(!stats.running);
    }
}

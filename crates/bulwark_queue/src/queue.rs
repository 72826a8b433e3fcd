//! Priority error queue.
//!
//! Four FIFO buckets, one per severity level. Dequeue always serves the
//! highest non-empty level; within a level, arrival order is preserved.
//! When full, the oldest entries of the lowest non-empty level are evicted
//! to make room.

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use bulwark_core::{ErrorContext, ErrorResponse, Severity};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const LEVELS: usize = 4;

fn level_of(severity: Severity) -> usize {
    match severity {
        Severity::Critical => 0,
        Severity::High => 1,
        Severity::Medium => 2,
        Severity::Low => 3,
    }
}

/// A queued error with its arrival sequence number
#[derive(Debug, Clone)]
pub struct QueuedError {
    /// Arrival sequence, strictly increasing per queue
    pub sequence: u64,
    /// Level the error was filed under
    pub severity: Severity,
    /// The error
    pub context: ErrorContext,
}

/// One flushed item forwarded to the sink
#[derive(Debug, Clone)]
pub struct FlushedItem {
    /// The drained error
    pub context: ErrorContext,
    /// The hand-off response produced for it
    pub response: ErrorResponse,
}

/// What `enqueue` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Whether the error was inserted
    pub accepted: bool,
    /// Entries evicted to make room
    pub evicted: usize,
    /// Queue size afterwards
    pub size: usize,
}

/// Per-level item counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriorityCounts {
    /// Critical
    pub critical: usize,
    /// High
    pub high: usize,
    /// Medium
    pub medium: usize,
    /// Low
    pub low: usize,
}

/// Queue status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Items currently queued
    pub size: usize,
    /// Whether a flush is in progress
    pub processing: bool,
    /// Items per level
    pub priority_counts: PriorityCounts,
    /// Capacity
    pub max_queue_size: usize,
    /// Lifetime: accepted items
    pub total_enqueued: u64,
    /// Lifetime: items evicted for capacity
    pub total_evicted: u64,
    /// Lifetime: items refused for lack of capacity
    pub total_dropped: u64,
    /// Lifetime: items drained by flush
    pub total_flushed: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    buckets: [VecDeque<QueuedError>; LEVELS],
    next_sequence: u64,
    processing: bool,
    total_enqueued: u64,
    total_evicted: u64,
    total_dropped: u64,
    total_flushed: u64,
}

impl QueueState {
    fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    fn pop_highest(&mut self) -> Option<QueuedError> {
        self.buckets.iter_mut().find_map(VecDeque::pop_front)
    }

    fn evict_lowest(&mut self, count: usize) -> Vec<QueuedError> {
        let mut evicted = Vec::with_capacity(count);
        for bucket in self.buckets.iter_mut().rev() {
            while evicted.len() < count {
                match bucket.pop_front() {
                    Some(item) => evicted.push(item),
                    None => break,
                }
            }
            if evicted.len() == count {
                break;
            }
        }
        evicted
    }

    fn counts(&self) -> PriorityCounts {
        PriorityCounts {
            critical: self.buckets[0].len(),
            high: self.buckets[1].len(),
            medium: self.buckets[2].len(),
            low: self.buckets[3].len(),
        }
    }
}

#[derive(Debug)]
struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    initialized: AtomicBool,
    sink: Option<mpsc::UnboundedSender<Vec<FlushedItem>>>,
}

impl QueueInner {
    fn ensure_initialized(&self) -> QueueResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(QueueError::NotInitialized)
        }
    }

    async fn drain(&self) -> Vec<FlushedItem> {
        let taken = self.take_all().await;
        self.hand_off(taken).await
    }

    /// Empty every bucket and mark the queue as processing
    async fn take_all(&self) -> Vec<QueuedError> {
        let mut state = self.state.lock().await;
        state.processing = true;
        let mut drained = Vec::with_capacity(state.len());
        while let Some(item) = state.pop_highest() {
            drained.push(item);
        }
        state.total_flushed += drained.len() as u64;
        drained
    }

    /// Build hand-off responses, forward them, then clear the processing flag
    async fn hand_off(&self, drained: Vec<QueuedError>) -> Vec<FlushedItem> {
        let items: Vec<FlushedItem> = drained
            .into_iter()
            .map(|item| FlushedItem {
                response: ErrorResponse::queued(&item.context),
                context: item.context,
            })
            .collect();

        if !items.is_empty() {
            debug!(count = items.len(), "error queue flushed");
            self.forward(&items);
        }
        self.state.lock().await.processing = false;
        items
    }

    fn forward(&self, items: &[FlushedItem]) {
        let Some(sink) = &self.sink else {
            return;
        };
        for chunk in items.chunks(self.config.max_batch_size.max(1)) {
            if sink.send(chunk.to_vec()).is_err() {
                warn!(count = chunk.len(), "flush sink closed, batch dropped");
                return;
            }
        }
    }
}

/// Priority-ordered buffer of classified errors
#[derive(Debug)]
pub struct ErrorQueueManager {
    inner: Arc<QueueInner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ErrorQueueManager {
    /// Create an uninitialized queue
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a queue that forwards flushed batches to `sink`
    #[must_use]
    pub fn with_sink(config: QueueConfig, sink: mpsc::UnboundedSender<Vec<FlushedItem>>) -> Self {
        Self::build(config, Some(sink))
    }

    fn build(config: QueueConfig, sink: Option<mpsc::UnboundedSender<Vec<FlushedItem>>>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
                initialized: AtomicBool::new(false),
                sink,
            }),
            timer: Mutex::new(None),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Whether `initialize()` has run
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Start accepting errors and, if batch processing is enabled, the
    /// auto-flush timer. Idempotent.
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            return;
        }

        let config = &self.inner.config;
        if config.enable_batch_processing && config.flush_interval_ms > 0 {
            let inner = Arc::clone(&self.inner);
            let period = Duration::from_millis(config.flush_interval_ms);
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // the first tick completes immediately
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if !inner.initialized.load(Ordering::Acquire) {
                        break;
                    }
                    inner.drain().await;
                }
            });
            *self.timer.lock().await = Some(handle);
        }

        info!(
            max_queue_size = config.max_queue_size,
            flush_interval_ms = config.flush_interval_ms,
            "error queue initialized"
        );
    }

    /// Stop the timer and flush whatever remains. Idempotent.
    pub async fn shutdown(&self) -> Vec<ErrorResponse> {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
        if !self.inner.initialized.swap(false, Ordering::AcqRel) {
            return Vec::new();
        }
        let remaining = self.inner.drain().await;
        info!(flushed = remaining.len(), "error queue shut down");
        remaining.into_iter().map(|item| item.response).collect()
    }

    /// File an error under its severity (medium when unclassified)
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn enqueue(&self, context: ErrorContext) -> QueueResult<EnqueueOutcome> {
        self.inner.ensure_initialized()?;
        let max = self.inner.config.max_queue_size;
        let severity = context
            .classification
            .map_or(Severity::Medium, |c| c.severity);

        let mut state = self.inner.state.lock().await;

        let mut evicted = 0;
        if state.len() >= max {
            let victims = state.evict_lowest(self.inner.config.eviction_count());
            evicted = victims.len();
            state.total_evicted += evicted as u64;
            if evicted > 0 {
                warn!(
                    evicted,
                    error_ids = ?victims.iter().map(|v| v.context.error_id.as_str()).collect::<Vec<_>>(),
                    "error queue full, evicted lowest-priority entries"
                );
            }
        }

        if state.len() >= max {
            state.total_dropped += 1;
            warn!(error_id = %context.error_id, "error queue has no capacity, error dropped");
            return Ok(EnqueueOutcome {
                accepted: false,
                evicted,
                size: state.len(),
            });
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.total_enqueued += 1;
        debug!(error_id = %context.error_id, severity = %severity, "error enqueued");
        state.buckets[level_of(severity)].push_back(QueuedError {
            sequence,
            severity,
            context,
        });

        Ok(EnqueueOutcome {
            accepted: true,
            evicted,
            size: state.len(),
        })
    }

    /// Remove the next error: highest level first, FIFO within a level
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn dequeue(&self) -> QueueResult<Option<QueuedError>> {
        self.inner.ensure_initialized()?;
        Ok(self.inner.state.lock().await.pop_highest())
    }

    /// Remove up to `n` errors (capped by `max_batch_size`) in dequeue order
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn dequeue_batch(&self, n: usize) -> QueueResult<Vec<QueuedError>> {
        self.inner.ensure_initialized()?;
        let n = n.min(self.inner.config.max_batch_size.max(1));
        let mut state = self.inner.state.lock().await;
        let mut batch = Vec::with_capacity(n);
        while batch.len() < n {
            match state.pop_highest() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        Ok(batch)
    }

    /// The error `dequeue` would return, without removing it
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn peek(&self) -> QueueResult<Option<QueuedError>> {
        self.inner.ensure_initialized()?;
        let state = self.inner.state.lock().await;
        Ok(state.buckets.iter().find_map(|b| b.front().cloned()))
    }

    /// Drain everything in priority order, one "queued" response per item
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn flush(&self) -> QueueResult<Vec<ErrorResponse>> {
        self.inner.ensure_initialized()?;
        let items = self.inner.drain().await;
        Ok(items.into_iter().map(|item| item.response).collect())
    }

    /// Discard everything without producing responses
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn clear(&self) -> QueueResult<usize> {
        self.inner.ensure_initialized()?;
        let mut state = self.inner.state.lock().await;
        let cleared = state.len();
        for bucket in &mut state.buckets {
            bucket.clear();
        }
        Ok(cleared)
    }

    /// Number of queued errors
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn len(&self) -> QueueResult<usize> {
        self.inner.ensure_initialized()?;
        Ok(self.inner.state.lock().await.len())
    }

    /// Whether the queue is empty
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Status snapshot
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotInitialized`] before `initialize()`
    pub async fn status(&self) -> QueueResult<QueueStatus> {
        self.inner.ensure_initialized()?;
        let state = self.inner.state.lock().await;
        Ok(QueueStatus {
            size: state.len(),
            processing: state.processing,
            priority_counts: state.counts(),
            max_queue_size: self.inner.config.max_queue_size,
            total_enqueued: state.total_enqueued,
            total_evicted: state.total_evicted,
            total_dropped: state.total_dropped,
            total_flushed: state.total_flushed,
        })
    }
}

impl Default for ErrorQueueManager {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

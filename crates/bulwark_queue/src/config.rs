//! Queue configuration.

use serde::{Deserialize, Serialize};

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of queued errors
    pub max_queue_size: usize,
    /// Auto-flush interval in milliseconds
    pub flush_interval_ms: u64,
    /// Enable timed auto-flush
    pub enable_batch_processing: bool,
    /// Maximum items per forwarded batch
    pub max_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            flush_interval_ms: 5000,
            enable_batch_processing: true,
            max_batch_size: 100,
        }
    }
}

impl QueueConfig {
    /// Set maximum queue size
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set auto-flush interval
    #[must_use]
    pub fn with_flush_interval(mut self, interval_ms: u64) -> Self {
        self.flush_interval_ms = interval_ms;
        self
    }

    /// Enable or disable timed auto-flush
    #[must_use]
    pub fn with_batch_processing(mut self, enabled: bool) -> Self {
        self.enable_batch_processing = enabled;
        self
    }

    /// Set maximum forwarded batch size
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Number of items evicted when the queue is full
    #[must_use]
    pub fn eviction_count(&self) -> usize {
        (self.max_queue_size / 10).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.flush_interval_ms, 5000);
        assert!(config.enable_batch_processing);
        assert_eq!(config.max_batch_size, 100);
    }

    #[test]
    fn test_eviction_count() {
        assert_eq!(QueueConfig::default().eviction_count(), 100);
        assert_eq!(QueueConfig::default().with_max_queue_size(3).eviction_count(), 1);
        assert_eq!(QueueConfig::default().with_max_queue_size(0).eviction_count(), 1);
    }
}

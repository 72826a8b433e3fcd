//! Retry backoff state.

use bulwark_core::Millis;
use serde::{Deserialize, Serialize};

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed per error
    pub max_retries: u32,
    /// First delay, in milliseconds
    pub delay_ms: u64,
    /// Delay growth factor
    pub backoff_multiplier: f64,
    /// Delay ceiling, in milliseconds
    pub max_delay_ms: u64,
    /// Response codes that trigger a retry
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            retryable_errors: vec![
                "PROCESSING_FAILED".to_string(),
                "TIMEOUT".to_string(),
                "NETWORK_ERROR".to_string(),
                "SERVICE_UNAVAILABLE".to_string(),
            ],
        }
    }
}

impl RetryConfig {
    /// Set retries allowed
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set first delay
    #[must_use]
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set growth factor
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set delay ceiling
    #[must_use]
    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Replace the retryable codes
    #[must_use]
    pub fn with_retryable_errors<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_errors = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a response code is retryable
    #[must_use]
    pub fn is_retryable(&self, code: &str) -> bool {
        self.retryable_errors.iter().any(|c| c == code)
    }
}

/// Outcome of asking for another retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    /// Retry after `delay_ms`
    Retry {
        /// 1-based attempt number
        attempt: u32,
        /// Delay before the attempt
        delay_ms: u64,
    },
    /// Retries used up
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Backoff progress for one error id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Retries granted so far
    pub retry_count: u32,
    /// When the first retry was requested
    pub start_time: Millis,
    /// Delay for the next retry
    pub next_delay_ms: u64,
}

impl RetryState {
    /// Fresh state
    #[must_use]
    pub fn new(config: &RetryConfig, now: Millis) -> Self {
        Self {
            retry_count: 0,
            start_time: now,
            next_delay_ms: config.delay_ms.min(config.max_delay_ms),
        }
    }

    /// Grant the next retry if any remain
    pub fn advance(&mut self, config: &RetryConfig) -> RetryDecision {
        if self.retry_count >= config.max_retries {
            return RetryDecision::Exhausted {
                attempts: self.retry_count,
            };
        }
        let delay_ms = self.next_delay_ms;
        self.retry_count += 1;
        let grown = (delay_ms as f64 * config.backoff_multiplier.max(1.0)).round();
        self.next_delay_ms = if grown >= config.max_delay_ms as f64 {
            config.max_delay_ms
        } else {
            grown as u64
        };
        RetryDecision::Retry {
            attempt: self.retry_count,
            delay_ms,
        }
    }

    /// Whether this state is older than `ttl_ms`
    #[must_use]
    pub fn is_stale(&self, now: Millis, ttl_ms: u64) -> bool {
        now.saturating_sub(self.start_time) > ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_backoff_sequence() {
        let config = RetryConfig::default();
        let mut state = RetryState::new(&config, 0);
        let delays: Vec<RetryDecision> = (0..4).map(|_| state.advance(&config)).collect();
        assert_eq!(
            delays,
            vec![
                RetryDecision::Retry { attempt: 1, delay_ms: 1_000 },
                RetryDecision::Retry { attempt: 2, delay_ms: 2_000 },
                RetryDecision::Retry { attempt: 3, delay_ms: 4_000 },
                RetryDecision::Exhausted { attempts: 3 },
            ]
        );
    }

    #[test]
    fn test_delay_capped() {
        let config = RetryConfig::default()
            .with_max_retries(10)
            .with_max_delay(5_000);
        let mut state = RetryState::new(&config, 0);
        let mut last = 0;
        for _ in 0..10 {
            if let RetryDecision::Retry { delay_ms, .. } = state.advance(&config) {
                last = delay_ms;
            }
        }
        assert_eq!(last, 5_000);
    }

    #[test]
    fn test_retryable_and_stale() {
        let config = RetryConfig::default().with_retryable_errors(["TIMEOUT"]);
        assert!(config.is_retryable("TIMEOUT"));
        assert!(!config.is_retryable("PROCESSING_FAILED"));

        let state = RetryState::new(&config, 1_000);
        assert!(!state.is_stale(1_000 + 3_600_000, 3_600_000));
        assert!(state.is_stale(1_001 + 3_600_000, 3_600_000));
    }

    proptest! {
        #[test]
        fn prop_backoff_bounded_and_monotonic(
            max_retries in 0u32..12,
            delay in 1u64..10_000,
            multiplier in 1.0f64..4.0,
            max_delay in 1u64..60_000,
        ) {
            let config = RetryConfig::default()
                .with_max_retries(max_retries)
                .with_delay(delay)
                .with_backoff_multiplier(multiplier)
                .with_max_delay(max_delay);
            let mut state = RetryState::new(&config, 0);
            let mut previous = 0;
            let mut granted = 0;
            loop {
                match state.advance(&config) {
                    RetryDecision::Retry { delay_ms, .. } => {
                        prop_assert!(delay_ms <= max_delay);
                        prop_assert!(delay_ms >= previous);
                        previous = delay_ms;
                        granted += 1;
                    }
                    RetryDecision::Exhausted { attempts } => {
                        prop_assert_eq!(attempts, max_retries);
                        break;
                    }
                }
            }
            prop_assert_eq!(granted, max_retries);
        }
    }
}

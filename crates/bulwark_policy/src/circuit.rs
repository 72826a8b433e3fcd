//! Per-module circuit breaker state machine.
//!
//! Closed until `threshold` failures accumulate, then open. An open breaker
//! turns half-open once `recovery_time_ms` has passed since the last failure.
//! A success while open or half-open closes it; a failure while half-open
//! reopens it.

use bulwark_core::Millis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures that open the breaker
    pub threshold: u32,
    /// Time after the last failure before a trial is allowed, in milliseconds
    pub recovery_time_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            recovery_time_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration
    #[must_use]
    pub const fn new(threshold: u32, recovery_time_ms: u64) -> Self {
        Self {
            threshold,
            recovery_time_ms,
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow
    Closed,
    /// Calls rejected
    Open,
    /// One trial allowed
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker for one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    /// Current state
    pub state: BreakerState,
    /// Failures since the breaker last closed
    pub failure_count: u32,
    /// Time of the last recorded failure
    pub last_failure_time: Option<Millis>,
    /// Time of the last recorded outcome
    pub last_attempt_time: Option<Millis>,
    /// Configuration of the most recent update
    pub config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Closed breaker
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_attempt_time: None,
            config,
        }
    }

    fn recovery_elapsed(&self, now: Millis) -> bool {
        self.last_failure_time
            .is_none_or(|t| now.saturating_sub(t) > self.config.recovery_time_ms)
    }

    /// Move open → half-open if the recovery window has passed
    pub fn refresh(&mut self, now: Millis) -> BreakerState {
        if self.state == BreakerState::Open && self.recovery_elapsed(now) {
            self.state = BreakerState::HalfOpen;
        }
        self.state
    }

    /// Whether a call may proceed now
    pub fn allows(&mut self, now: Millis) -> bool {
        self.refresh(now) != BreakerState::Open
    }

    /// Record an outcome; returns `(before, after)` states
    pub fn record(&mut self, success: bool, config: CircuitBreakerConfig, now: Millis) -> (BreakerState, BreakerState) {
        self.config = config;
        let before = self.refresh(now);
        self.last_attempt_time = Some(now);

        if success {
            if before != BreakerState::Closed {
                self.state = BreakerState::Closed;
                self.failure_count = 0;
            }
        } else {
            self.failure_count = self.failure_count.saturating_add(1);
            self.last_failure_time = Some(now);
            match before {
                BreakerState::Closed if self.failure_count >= self.config.threshold => {
                    self.state = BreakerState::Open;
                }
                BreakerState::HalfOpen => self.state = BreakerState::Open,
                _ => {}
            }
        }
        (before, self.state)
    }
}

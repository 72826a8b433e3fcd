//! BULWARK Policy Engine
//!
//! Resilience policies applied to error responses after a handler ran:
//! retry with exponential backoff, fallback responses, per-module circuit
//! breaking, notifications and custom hooks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod circuit;
pub mod engine;
pub mod error;
pub mod policy;
pub mod retry;

pub use circuit::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use engine::{CleanupReport, PolicyEngine, PolicyEngineConfig};
pub use error::{PolicyError, PolicyResult};
pub use policy::{ErrorPolicy, FallbackConfig, NotificationConfig, PolicyConfig};
pub use retry::{RetryConfig, RetryDecision, RetryState};

//! BULWARK Error Queue
//!
//! Priority-ordered buffer of classified errors with capacity eviction and
//! timed auto-flush.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod queue;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use queue::{
    EnqueueOutcome, ErrorQueueManager, FlushedItem, PriorityCounts, QueueStatus, QueuedError,
};

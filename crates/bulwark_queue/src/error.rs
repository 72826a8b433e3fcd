//! Queue errors.

use bulwark_core::CoreError;

/// Queue result type
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Used before `initialize()`
    #[error("Error queue manager not initialized")]
    NotInitialized,
}

impl From<QueueError> for CoreError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotInitialized => CoreError::not_initialized("ErrorQueueManager"),
        }
    }
}

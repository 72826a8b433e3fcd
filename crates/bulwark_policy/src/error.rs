//! Policy engine errors.

use bulwark_core::CoreError;

/// Policy result type
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Policy engine error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Used before `initialize()`
    #[error("Policy engine not initialized")]
    NotInitialized,

    /// Policy failed validation
    #[error("Invalid policy '{policy_id}': {reason}")]
    InvalidPolicy {
        /// Policy id (may be empty)
        policy_id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Policy id already registered
    #[error("Duplicate policy: {policy_id}")]
    DuplicatePolicy {
        /// Policy id
        policy_id: String,
    },

    /// Unknown policy id
    #[error("Policy not found: {policy_id}")]
    PolicyNotFound {
        /// Policy id
        policy_id: String,
    },

    /// A policy could not be applied to a response
    #[error("Policy '{policy_id}' failed to apply: {message}")]
    ApplyFailed {
        /// Policy id
        policy_id: String,
        /// Failure message
        message: String,
    },
}

impl PolicyError {
    pub(crate) fn invalid(policy_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            policy_id: policy_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<PolicyError> for CoreError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NotInitialized => CoreError::not_initialized("PolicyEngine"),
            PolicyError::InvalidPolicy { policy_id, reason } => CoreError::Validation {
                field: format!("policy.{}", policy_id),
                reason,
            },
            PolicyError::DuplicatePolicy { policy_id } => CoreError::AlreadyExists {
                kind: "policy".to_string(),
                id: policy_id,
            },
            PolicyError::PolicyNotFound { policy_id } => CoreError::NotFound {
                kind: "policy".to_string(),
                id: policy_id,
            },
            PolicyError::ApplyFailed { policy_id, message } => CoreError::Policy { policy_id, message },
        }
    }
}

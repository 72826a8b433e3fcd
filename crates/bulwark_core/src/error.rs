//! Core error types for BULWARK.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
///
/// Component crates keep their own error enums and convert into this one at
/// the crate boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A component was used before `initialize()` (or after `shutdown()`)
    #[error("{component} is not initialized")]
    NotInitialized {
        /// Component name
        component: String,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// What was wrong with it
        reason: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Dependency cycle between registered modules
    #[error("Dependency cycle detected among modules: {}", modules.join(", "))]
    DependencyCycle {
        /// Modules left unsorted by the cycle
        modules: Vec<String>,
    },

    /// A response handler failed
    #[error("Handler {handler} failed: {message}")]
    Handler {
        /// Handler name
        handler: String,
        /// Failure message
        message: String,
    },

    /// A policy failed to apply
    #[error("Policy {policy_id} failed: {message}")]
    Policy {
        /// Policy id
        policy_id: String,
        /// Failure message
        message: String,
    },

    /// Template rendering failed
    #[error("Template {template_id} failed: {message}")]
    Template {
        /// Template id
        template_id: String,
        /// Failure message
        message: String,
    },

    /// Serialization failure
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

    /// Operation cancelled (receiver dropped, task aborted)
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::NotInitialized`]
    #[must_use]
    pub fn not_initialized(component: &str) -> Self {
        Self::NotInitialized {
            component: component.to_string(),
        }
    }

    /// Shorthand for [`CoreError::Validation`]
    #[must_use]
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for this error
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized { .. } => "NOT_INITIALIZED",
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::DependencyCycle { .. } => "DEPENDENCY_CYCLE",
            Self::Handler { .. } => "HANDLER_FAILED",
            Self::Policy { .. } => "POLICY_FAILED",
            Self::Template { .. } => "TEMPLATE_FAILED",
            Self::Serialization { .. } => "SERIALIZATION_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

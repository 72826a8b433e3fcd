//! Classifier errors.

use bulwark_core::CoreError;

/// Classifier result type
pub type ClassifierResult<T> = Result<T, ClassifierError>;

/// Errors raised by rule registration and management
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    /// Rule failed validation
    #[error("Invalid rule '{rule_id}': {reason}")]
    InvalidRule {
        /// Offending rule id (may be empty)
        rule_id: String,
        /// Why it was rejected
        reason: String,
    },

    /// A rule with this id already exists in the family
    #[error("Duplicate rule: {rule_id}")]
    DuplicateRule {
        /// Rule id
        rule_id: String,
    },

    /// No rule with this id
    #[error("Rule not found: {rule_id}")]
    RuleNotFound {
        /// Rule id
        rule_id: String,
    },

    /// Used before `initialize()`
    #[error("Error classifier not initialized")]
    NotInitialized,
}

impl ClassifierError {
    pub(crate) fn invalid(rule_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule_id: rule_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ClassifierError> for CoreError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::InvalidRule { rule_id, reason } => CoreError::Validation {
                field: format!("rule.{}", rule_id),
                reason,
            },
            ClassifierError::DuplicateRule { rule_id } => CoreError::AlreadyExists {
                kind: "rule".to_string(),
                id: rule_id,
            },
            ClassifierError::RuleNotFound { rule_id } => CoreError::NotFound {
                kind: "rule".to_string(),
                id: rule_id,
            },
            ClassifierError::NotInitialized => CoreError::not_initialized("ErrorClassifier"),
        }
    }
}

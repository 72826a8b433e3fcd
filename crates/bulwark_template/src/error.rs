//! Template manager errors.

use bulwark_core::CoreError;

/// Template result type
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Template manager error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// Used before `initialize()`
    #[error("Response template manager not initialized")]
    NotInitialized,

    /// Template failed validation
    #[error("Invalid template '{template_id}': {reason}")]
    InvalidTemplate {
        /// Template id (may be empty)
        template_id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Unknown template id
    #[error("Template not found: {template_id}")]
    TemplateNotFound {
        /// Template id
        template_id: String,
    },

    /// Rendered output did not form a response
    #[error("Template '{template_id}' failed to render: {message}")]
    Render {
        /// Template id
        template_id: String,
        /// Failure message
        message: String,
    },
}

impl TemplateError {
    pub(crate) fn invalid(template_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template_id: template_id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(template_id: &str) -> Self {
        Self::TemplateNotFound {
            template_id: template_id.to_string(),
        }
    }
}

impl From<TemplateError> for CoreError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotInitialized => CoreError::not_initialized("ResponseTemplateManager"),
            TemplateError::InvalidTemplate { template_id, reason } => CoreError::Validation {
                field: format!("template.{}", template_id),
                reason,
            },
            TemplateError::TemplateNotFound { template_id } => CoreError::NotFound {
                kind: "template".to_string(),
                id: template_id,
            },
            TemplateError::Render { template_id, message } => {
                CoreError::Template { template_id, message }
            }
        }
    }
}

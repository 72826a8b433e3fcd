//! Registry errors.

use bulwark_core::CoreError;

/// Registry result type
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Used before `initialize()`
    #[error("Module registry not initialized")]
    NotInitialized,

    /// Registration failed validation
    #[error("Invalid registration for '{module_id}': {reason}")]
    InvalidRegistration {
        /// Module id (may be empty)
        module_id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Module id already registered
    #[error("Module already registered: {module_id}")]
    AlreadyRegistered {
        /// Module id
        module_id: String,
    },

    /// Unknown module id
    #[error("Module not found: {module_id}")]
    ModuleNotFound {
        /// Module id
        module_id: String,
    },

    /// Dependencies form a cycle
    #[error("Dependency cycle among modules: {}", modules.join(", "))]
    DependencyCycle {
        /// Modules left unsorted
        modules: Vec<String>,
    },
}

impl From<RegistryError> for CoreError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotInitialized => CoreError::not_initialized("ModuleRegistryManager"),
            RegistryError::InvalidRegistration { module_id, reason } => CoreError::Validation {
                field: format!("module.{}", module_id),
                reason,
            },
            RegistryError::AlreadyRegistered { module_id } => CoreError::AlreadyExists {
                kind: "module".to_string(),
                id: module_id,
            },
            RegistryError::ModuleNotFound { module_id } => CoreError::NotFound {
                kind: "module".to_string(),
                id: module_id,
            },
            RegistryError::DependencyCycle { modules } => CoreError::DependencyCycle { modules },
        }
    }
}

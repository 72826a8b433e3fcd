//! Identifier generation.
//!
//! Identifiers are plain strings on the wire (modules supply their own error
//! ids), but everything generated here is `<prefix>_<uuid>` so the origin of
//! an id is visible in logs.

use uuid::Uuid;

/// Well-known id prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdPrefix {
    /// Error reported by a module
    Error,
    /// Response produced by the executor
    Execution,
    /// Response produced from a template
    Template,
    /// Hand-off response produced by a queue flush
    Queued,
    /// Degraded response synthesized after a failure
    Fallback,
    /// Action attached to a response
    Action,
    /// Annotation attached to a response
    Annotation,
}

impl IdPrefix {
    /// Prefix text
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "err",
            Self::Execution => "exec",
            Self::Template => "tmpl",
            Self::Queued => "queued",
            Self::Fallback => "fallback",
            Self::Action => "act",
            Self::Annotation => "ann",
        }
    }

    /// Generate a fresh id with this prefix
    #[must_use]
    pub fn generate(&self) -> String {
        generate(self.as_str())
    }
}

/// Generate `<prefix>_<uuid-v4-simple>`
#[must_use]
pub fn generate(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_prefix() {
        let id = IdPrefix::Execution.generate();
        assert!(id.starts_with("exec_"));
        assert_eq!(id.len(), "exec_".len() + 32);
    }

    #[test]
    fn test_ids_unique() {
        assert_ne!(IdPrefix::Action.generate(), IdPrefix::Action.generate());
    }

    #[test]
    fn test_generate_custom_prefix() {
        assert!(generate("trace").starts_with("trace_"));
    }
}

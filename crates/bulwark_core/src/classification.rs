//! The five classification dimensions of a failure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a failure originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    /// Inside a participating module
    Module,
    /// Network transport
    Network,
    /// Host system (memory, disk, process)
    System,
    /// Third-party service
    External,
    /// Could not be determined
    Unknown,
}

/// What kind of failure it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Programming or runtime fault
    Technical,
    /// Business rule violation
    Business,
    /// Bad or missing configuration
    Configuration,
    /// Resource exhaustion
    Resource,
    /// Network failure
    Network,
    /// Failing dependency
    Dependency,
}

/// How bad it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic or informational
    Low,
    /// Degraded behaviour
    Medium,
    /// Feature unavailable
    High,
    /// Service unavailable
    Critical,
}

/// How far it spreads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    /// Confined to the reporting module
    SingleModule,
    /// Affects dependents of the reporting module
    MultipleModule,
    /// Affects the whole system
    SystemWide,
}

/// Whether it can be recovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recoverability {
    /// Recoverable with intervention
    Recoverable,
    /// Recovers on its own (retry, reconnect)
    AutoRecoverable,
    /// Permanent
    NonRecoverable,
}

macro_rules! impl_as_str {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Wire name of this value
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_as_str!(ErrorSource {
    Module => "module",
    Network => "network",
    System => "system",
    External => "external",
    Unknown => "unknown",
});

impl_as_str!(ErrorType {
    Technical => "technical",
    Business => "business",
    Configuration => "configuration",
    Resource => "resource",
    Network => "network",
    Dependency => "dependency",
});

impl_as_str!(Severity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl_as_str!(Impact {
    SingleModule => "single_module",
    MultipleModule => "multiple_module",
    SystemWide => "system_wide",
});

impl_as_str!(Recoverability {
    Recoverable => "recoverable",
    AutoRecoverable => "auto_recoverable",
    NonRecoverable => "non_recoverable",
});

impl Severity {
    /// All severities, most severe first
    pub const DESCENDING: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];
}

/// Classification of a single failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Origin
    pub source: ErrorSource,
    /// Kind
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    /// Severity
    pub severity: Severity,
    /// Blast radius
    pub impact: Impact,
    /// Recoverability
    pub recoverability: Recoverability,
}

impl ErrorClassification {
    /// Create a classification from all five dimensions
    #[must_use]
    pub const fn new(
        source: ErrorSource,
        error_type: ErrorType,
        severity: Severity,
        impact: Impact,
        recoverability: Recoverability,
    ) -> Self {
        Self {
            source,
            error_type,
            severity,
            impact,
            recoverability,
        }
    }

    /// Classification used when no rule or heuristic decides otherwise
    #[must_use]
    pub const fn default_classification() -> Self {
        Self::new(
            ErrorSource::Module,
            ErrorType::Technical,
            Severity::Medium,
            Impact::SingleModule,
            Recoverability::Recoverable,
        )
    }

    /// Classification used when the classification pipeline itself failed
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            source: ErrorSource::Unknown,
            ..Self::default_classification()
        }
    }

    /// Set severity
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set source
    #[must_use]
    pub const fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = source;
        self
    }

    /// Set type
    #[must_use]
    pub const fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }
}

impl Default for ErrorClassification {
    fn default() -> Self {
        Self::default_classification()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let c = ErrorClassification::default();
        assert_eq!(c.source, ErrorSource::Module);
        assert_eq!(c.error_type, ErrorType::Technical);
        assert_eq!(c.severity, Severity::Medium);
        assert_eq!(c.impact, Impact::SingleModule);
        assert_eq!(c.recoverability, Recoverability::Recoverable);
    }

    #[test]
    fn test_unknown_classification() {
        let c = ErrorClassification::unknown();
        assert_eq!(c.source, ErrorSource::Unknown);
        assert_eq!(c.severity, Severity::Medium);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::DESCENDING[0], Severity::Critical);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(Impact::SystemWide.to_string(), "system_wide");
        assert_eq!(Recoverability::AutoRecoverable.as_str(), "auto_recoverable");

        let json = serde_json::to_value(ErrorClassification::default()).unwrap();
        assert_eq!(json["type"], "technical");
        assert_eq!(json["impact"], "single_module");
    }

    #[test]
    fn test_serde_roundtrip_snake_case() {
        let c: ErrorClassification = serde_json::from_str(
            r#"{"source":"network","type":"network","severity":"high","impact":"multiple_module","recoverability":"auto_recoverable"}"#,
        )
        .unwrap();
        assert_eq!(c.source, ErrorSource::Network);
        assert_eq!(c.severity, Severity::High);
    }
}

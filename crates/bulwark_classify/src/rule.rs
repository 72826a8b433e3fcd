//! Classification rules and their criteria.

use crate::error::{ClassifierError, ClassifierResult};
use bulwark_core::{
    ErrorInfo, ErrorSource, ErrorType, Impact, ModuleSource, Recoverability, Severity,
};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Field of the failure a criterion inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionField {
    /// `error.message`
    Message,
    /// `error.name`
    Name,
    /// `error.stack`
    Stack,
    /// `source.module_id`
    ModuleId,
    /// `source.module_name`
    ModuleName,
    /// `source.version`
    Version,
    /// `source.file_name`
    FileName,
}

impl CriterionField {
    /// Resolve against a failure; `None` when the field is absent
    #[must_use]
    pub fn resolve<'a>(&self, error: &'a ErrorInfo, source: &'a ModuleSource) -> Option<&'a str> {
        match self {
            Self::Message => Some(&error.message),
            Self::Name => Some(&error.name),
            Self::Stack => error.stack.as_deref(),
            Self::ModuleId => Some(&source.module_id),
            Self::ModuleName => Some(&source.module_name),
            Self::Version => Some(&source.version),
            Self::FileName => source.file_name.as_deref(),
        }
    }
}

/// String operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    /// Exact match
    Equals,
    /// Negated exact match
    NotEquals,
    /// Substring
    Contains,
    /// Negated substring
    NotContains,
    /// Regular expression
    Regex,
    /// Prefix
    StartsWith,
    /// Suffix
    EndsWith,
}

/// One field/operator/value test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    /// Inspected field
    pub field: CriterionField,
    /// Operator
    pub operator: MatchOperator,
    /// Operand
    pub value: String,
    /// Compare case-insensitively
    #[serde(default)]
    pub ignore_case: bool,
}

impl Criterion {
    /// Create a case-sensitive criterion
    #[must_use]
    pub fn new(field: CriterionField, operator: MatchOperator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
            ignore_case: false,
        }
    }

    /// Case-insensitive `contains` on the message
    #[must_use]
    pub fn message_contains(value: impl Into<String>) -> Self {
        Self::new(CriterionField::Message, MatchOperator::Contains, value).ignoring_case()
    }

    /// Compare case-insensitively
    #[must_use]
    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    fn compile(&self) -> Result<Option<Regex>, regex::Error> {
        if self.operator != MatchOperator::Regex {
            return Ok(None);
        }
        RegexBuilder::new(&self.value)
            .case_insensitive(self.ignore_case)
            .build()
            .map(Some)
    }
}

/// What a matching rule decides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleOutcome {
    /// Source and type
    Classification {
        /// Source
        source: ErrorSource,
        /// Type
        #[serde(rename = "type")]
        error_type: ErrorType,
    },
    /// Severity
    Severity {
        /// Severity
        severity: Severity,
    },
    /// Impact
    Impact {
        /// Impact
        impact: Impact,
    },
    /// Recoverability
    Recoverability {
        /// Recoverability
        recoverability: Recoverability,
    },
}

impl RuleOutcome {
    /// Family this outcome belongs to
    #[must_use]
    pub const fn family(&self) -> RuleFamily {
        match self {
            Self::Classification { .. } => RuleFamily::Classification,
            Self::Severity { .. } => RuleFamily::Severity,
            Self::Impact { .. } => RuleFamily::Impact,
            Self::Recoverability { .. } => RuleFamily::Recoverability,
        }
    }
}

/// Rule family, one per classification dimension group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFamily {
    /// Source and type
    Classification,
    /// Severity
    Severity,
    /// Impact
    Impact,
    /// Recoverability
    Recoverability,
}

impl RuleFamily {
    /// All families
    pub const ALL: [RuleFamily; 4] = [
        RuleFamily::Classification,
        RuleFamily::Severity,
        RuleFamily::Impact,
        RuleFamily::Recoverability,
    ];

    /// Name used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Severity => "severity",
            Self::Impact => "impact",
            Self::Recoverability => "recoverability",
        }
    }
}

/// A classification rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Rule id, unique within its family
    pub id: String,
    /// Display name
    pub name: String,
    /// Disabled rules never match
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Priority, used only by [`crate::MatchOrder::Priority`]
    #[serde(default)]
    pub priority: i32,
    /// Conjunction of criteria
    pub criteria: Vec<Criterion>,
    /// Decision
    pub outcome: RuleOutcome,
}

fn default_enabled() -> bool {
    true
}

impl ClassificationRule {
    /// Create an enabled rule with no criteria
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, outcome: RuleOutcome) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            priority: 0,
            criteria: Vec::new(),
            outcome,
        }
    }

    /// Add a criterion
    #[must_use]
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Set priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Enable or disable
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate for registration into `family` and precompile its regexes
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::InvalidRule`] on any violation
    pub fn compile(self, family: RuleFamily) -> ClassifierResult<CompiledRule> {
        if self.id.trim().is_empty() {
            return Err(ClassifierError::invalid(&self.id, "id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(ClassifierError::invalid(&self.id, "name must not be empty"));
        }
        if self.priority < 0 {
            return Err(ClassifierError::invalid(
                &self.id,
                format!("priority must be non-negative, got {}", self.priority),
            ));
        }
        if self.outcome.family() != family {
            return Err(ClassifierError::invalid(
                &self.id,
                format!(
                    "{} outcome registered as a {} rule",
                    self.outcome.family().as_str(),
                    family.as_str()
                ),
            ));
        }
        if self.criteria.is_empty() {
            return Err(ClassifierError::invalid(&self.id, "at least one criterion is required"));
        }

        let mut regexes = Vec::with_capacity(self.criteria.len());
        for criterion in &self.criteria {
            let compiled = criterion
                .compile()
                .map_err(|e| ClassifierError::invalid(&self.id, e.to_string()))?;
            regexes.push(compiled);
        }

        Ok(CompiledRule {
            rule: self,
            regexes,
        })
    }
}

/// A validated rule with its regexes compiled once
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: ClassificationRule,
    regexes: Vec<Option<Regex>>,
}

impl CompiledRule {
    /// The source rule
    #[must_use]
    pub fn rule(&self) -> &ClassificationRule {
        &self.rule
    }

    pub(crate) fn rule_mut(&mut self) -> &mut ClassificationRule {
        &mut self.rule
    }

    /// Whether every criterion holds (disabled rules never match)
    #[must_use]
    pub fn matches(&self, error: &ErrorInfo, source: &ModuleSource) -> bool {
        self.rule.enabled
            && self
                .rule
                .criteria
                .iter()
                .zip(&self.regexes)
                .all(|(criterion, regex)| test_criterion(criterion, regex.as_ref(), error, source))
    }
}

fn test_criterion(
    criterion: &Criterion,
    regex: Option<&Regex>,
    error: &ErrorInfo,
    source: &ModuleSource,
) -> bool {
    let Some(actual) = criterion.field.resolve(error, source) else {
        return matches!(
            criterion.operator,
            MatchOperator::NotEquals | MatchOperator::NotContains
        );
    };

    if let Some(re) = regex {
        return re.is_match(actual);
    }

    let (actual, expected) = if criterion.ignore_case {
        (actual.to_lowercase(), criterion.value.to_lowercase())
    } else {
        (actual.to_string(), criterion.value.clone())
    };

    match criterion.operator {
        MatchOperator::Equals => actual == expected,
        MatchOperator::NotEquals => actual != expected,
        MatchOperator::Contains => actual.contains(&expected),
        MatchOperator::NotContains => !actual.contains(&expected),
        MatchOperator::StartsWith => actual.starts_with(&expected),
        MatchOperator::EndsWith => actual.ends_with(&expected),
        // compiled above; an uncompiled regex never matches
        MatchOperator::Regex => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str) -> (ErrorInfo, ModuleSource) {
        (
            ErrorInfo::new(message, "Error"),
            ModuleSource::new("db", "Database", "2.0.0"),
        )
    }

    fn severity_rule(id: &str) -> ClassificationRule {
        ClassificationRule::new(
            id,
            "disk",
            RuleOutcome::Severity {
                severity: Severity::Critical,
            },
        )
    }

    #[test]
    fn test_compile_rejects_invalid_rules() {
        let empty_id = severity_rule("").with_criterion(Criterion::message_contains("disk"));
        assert!(empty_id.compile(RuleFamily::Severity).is_err());

        let no_criteria = severity_rule("r1");
        assert!(no_criteria.compile(RuleFamily::Severity).is_err());

        let negative = severity_rule("r1")
            .with_priority(-1)
            .with_criterion(Criterion::message_contains("disk"));
        assert!(negative.compile(RuleFamily::Severity).is_err());

        let wrong_family = severity_rule("r1").with_criterion(Criterion::message_contains("disk"));
        let err = wrong_family.compile(RuleFamily::Impact).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidRule { .. }));

        let bad_regex = severity_rule("r1").with_criterion(Criterion::new(
            CriterionField::Message,
            MatchOperator::Regex,
            "([",
        ));
        assert!(bad_regex.compile(RuleFamily::Severity).is_err());
    }

    #[test]
    fn test_matches_conjunction() {
        let rule = severity_rule("r1")
            .with_criterion(Criterion::message_contains("DISK"))
            .with_criterion(Criterion::new(CriterionField::ModuleId, MatchOperator::Equals, "db"))
            .compile(RuleFamily::Severity)
            .unwrap();

        let (error, source) = failure("disk full");
        assert!(rule.matches(&error, &source));

        let other = ModuleSource::new("cache", "Cache", "1.0.0");
        assert!(!rule.matches(&error, &other));
    }

    #[test]
    fn test_regex_ignore_case() {
        let rule = severity_rule("r1")
            .with_criterion(
                Criterion::new(CriterionField::Message, MatchOperator::Regex, r"^disk\s+full$")
                    .ignoring_case(),
            )
            .compile(RuleFamily::Severity)
            .unwrap();
        let (error, source) = failure("DISK FULL");
        assert!(rule.matches(&error, &source));
    }

    #[test]
    fn test_missing_optional_field() {
        let rule = severity_rule("r1")
            .with_criterion(Criterion::new(CriterionField::Stack, MatchOperator::NotContains, "x"))
            .compile(RuleFamily::Severity)
            .unwrap();
        let (error, source) = failure("anything");
        assert!(rule.matches(&error, &source));

        let positive = severity_rule("r2")
            .with_criterion(Criterion::new(CriterionField::FileName, MatchOperator::EndsWith, ".rs"))
            .compile(RuleFamily::Severity)
            .unwrap();
        assert!(!positive.matches(&error, &source));
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let rule = severity_rule("r1")
            .with_enabled(false)
            .with_criterion(Criterion::message_contains("disk"))
            .compile(RuleFamily::Severity)
            .unwrap();
        let (error, source) = failure("disk full");
        assert!(!rule.matches(&error, &source));
    }

    #[test]
    fn test_rule_serde_shape() {
        let rule: ClassificationRule = serde_json::from_value(serde_json::json!({
            "id": "net",
            "name": "Network",
            "criteria": [{"field": "message", "operator": "contains", "value": "socket"}],
            "outcome": {"kind": "classification", "source": "network", "type": "network"}
        }))
        .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.outcome.family(), RuleFamily::Classification);
    }
}

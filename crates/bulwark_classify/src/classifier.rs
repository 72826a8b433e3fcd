//! The rule-based error classifier.

use crate::error::{ClassifierError, ClassifierResult};
use crate::heuristics;
use crate::rule::{
    ClassificationRule, CompiledRule, Criterion, CriterionField, MatchOperator, RuleFamily,
    RuleOutcome,
};
use bulwark_core::{
    ErrorClassification, ErrorInfo, ErrorSource, ErrorType, Impact, ModuleSource,
    Recoverability, Severity,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Order in which rules of one family are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrder {
    /// First registered rule wins
    #[default]
    Registration,
    /// Highest priority wins, ties broken by registration order
    Priority,
}

/// Classifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Rule match order
    pub match_order: MatchOrder,
    /// Install the built-in rule set on `initialize()`
    pub builtin_rules: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            match_order: MatchOrder::Registration,
            builtin_rules: true,
        }
    }
}

impl ClassifierConfig {
    /// Set match order
    #[must_use]
    pub fn with_match_order(mut self, match_order: MatchOrder) -> Self {
        self.match_order = match_order;
        self
    }

    /// Toggle built-in rules
    #[must_use]
    pub fn with_builtin_rules(mut self, enabled: bool) -> Self {
        self.builtin_rules = enabled;
        self
    }
}

/// Snapshot of classifier counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassifierStats {
    /// Failures classified
    pub classified: u64,
    /// Dimension decisions made by a rule
    pub rule_hits: u64,
    /// Dimension decisions made by keyword heuristics
    pub heuristic_hits: u64,
    /// Dimension decisions left at the default
    pub defaulted: u64,
    /// Classifications that fell back to `unknown`
    pub fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    classified: AtomicU64,
    rule_hits: AtomicU64,
    heuristic_hits: AtomicU64,
    defaulted: AtomicU64,
    fallbacks: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ClassifierStats {
        ClassifierStats {
            classified: self.classified.load(Ordering::Relaxed),
            rule_hits: self.rule_hits.load(Ordering::Relaxed),
            heuristic_hits: self.heuristic_hits.load(Ordering::Relaxed),
            defaulted: self.defaulted.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.classified,
            &self.rule_hits,
            &self.heuristic_hits,
            &self.defaulted,
            &self.fallbacks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Record how one dimension was decided and return the value
    fn decide<T>(&self, rule: Option<T>, heuristic: impl FnOnce() -> Option<T>, default: T) -> T {
        if let Some(value) = rule {
            self.rule_hits.fetch_add(1, Ordering::Relaxed);
            return value;
        }
        if let Some(value) = heuristic() {
            self.heuristic_hits.fetch_add(1, Ordering::Relaxed);
            return value;
        }
        self.defaulted.fetch_add(1, Ordering::Relaxed);
        default
    }
}

type RuleBook = IndexMap<RuleFamily, Vec<CompiledRule>>;

/// Assigns a five-dimension classification to a raw failure
#[derive(Debug)]
pub struct ErrorClassifier {
    config: ClassifierConfig,
    rules: RwLock<RuleBook>,
    initialized: AtomicBool,
    counters: Counters,
}

impl ErrorClassifier {
    /// Create an uninitialized classifier
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        let rules = RuleFamily::ALL.iter().map(|f| (*f, Vec::new())).collect();
        Self {
            config,
            rules: RwLock::new(rules),
            initialized: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Initialize, installing built-in rules if configured. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if a built-in rule fails validation
    pub async fn initialize(&self) -> ClassifierResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.config.builtin_rules {
            let mut book = self.rules.write().await;
            for rule in builtin_rules() {
                let family = rule.outcome.family();
                let rules = book.entry(family).or_default();
                if rules.iter().any(|r| r.rule().id == rule.id) {
                    continue;
                }
                rules.push(rule.compile(family)?);
            }
        }
        self.initialized.store(true, Ordering::Release);
        info!(match_order = ?self.config.match_order, "error classifier initialized");
        Ok(())
    }

    /// Drop all rules and counters. Idempotent.
    pub async fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut book = self.rules.write().await;
        for rules in book.values_mut() {
            rules.clear();
        }
        self.counters.reset();
        info!("error classifier shut down");
    }

    /// Whether `initialize()` has run
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Register a source/type rule
    ///
    /// # Errors
    ///
    /// Returns error if the rule is invalid or its id is taken
    pub async fn register_classification_rule(&self, rule: ClassificationRule) -> ClassifierResult<()> {
        self.register(RuleFamily::Classification, rule).await
    }

    /// Register a severity rule
    ///
    /// # Errors
    ///
    /// Returns error if the rule is invalid or its id is taken
    pub async fn register_severity_rule(&self, rule: ClassificationRule) -> ClassifierResult<()> {
        self.register(RuleFamily::Severity, rule).await
    }

    /// Register an impact rule
    ///
    /// # Errors
    ///
    /// Returns error if the rule is invalid or its id is taken
    pub async fn register_impact_rule(&self, rule: ClassificationRule) -> ClassifierResult<()> {
        self.register(RuleFamily::Impact, rule).await
    }

    /// Register a recoverability rule
    ///
    /// # Errors
    ///
    /// Returns error if the rule is invalid or its id is taken
    pub async fn register_recoverability_rule(&self, rule: ClassificationRule) -> ClassifierResult<()> {
        self.register(RuleFamily::Recoverability, rule).await
    }

    async fn register(&self, family: RuleFamily, rule: ClassificationRule) -> ClassifierResult<()> {
        let compiled = rule.compile(family)?;
        let mut book = self.rules.write().await;
        let rules = book.entry(family).or_default();
        let id = compiled.rule().id.clone();
        if rules.iter().any(|r| r.rule().id == id) {
            return Err(ClassifierError::DuplicateRule { rule_id: id });
        }
        rules.push(compiled);
        info!(family = family.as_str(), rule_id = %id, "classification rule registered");
        Ok(())
    }

    /// Remove a rule
    ///
    /// # Errors
    ///
    /// Returns error if no such rule exists
    pub async fn remove_rule(&self, family: RuleFamily, rule_id: &str) -> ClassifierResult<ClassificationRule> {
        let mut book = self.rules.write().await;
        let rules = book.entry(family).or_default();
        let index = rules
            .iter()
            .position(|r| r.rule().id == rule_id)
            .ok_or_else(|| ClassifierError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })?;
        let removed = rules.remove(index);
        debug!(family = family.as_str(), rule_id, "classification rule removed");
        Ok(removed.rule().clone())
    }

    /// Enable or disable a rule
    ///
    /// # Errors
    ///
    /// Returns error if no such rule exists
    pub async fn set_rule_enabled(&self, family: RuleFamily, rule_id: &str, enabled: bool) -> ClassifierResult<()> {
        let mut book = self.rules.write().await;
        let rule = book
            .get_mut(&family)
            .and_then(|rules| rules.iter_mut().find(|r| r.rule().id == rule_id))
            .ok_or_else(|| ClassifierError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })?;
        rule.rule_mut().enabled = enabled;
        Ok(())
    }

    /// Number of rules in a family
    pub async fn rule_count(&self, family: RuleFamily) -> usize {
        self.rules.read().await.get(&family).map_or(0, Vec::len)
    }

    /// Rules of a family in registration order
    pub async fn rules(&self, family: RuleFamily) -> Vec<ClassificationRule> {
        self.rules
            .read()
            .await
            .get(&family)
            .map(|rules| rules.iter().map(|r| r.rule().clone()).collect())
            .unwrap_or_default()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> ClassifierStats {
        self.counters.snapshot()
    }

    /// Classify a failure. Never fails.
    pub async fn classify(&self, error: &ErrorInfo, source: &ModuleSource) -> ErrorClassification {
        self.counters.classified.fetch_add(1, Ordering::Relaxed);
        match self.try_classify(error, source).await {
            Ok(classification) => {
                debug!(
                    module_id = %source.module_id,
                    source = %classification.source,
                    error_type = %classification.error_type,
                    severity = %classification.severity,
                    "error classified"
                );
                classification
            }
            Err(err) => {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(module_id = %source.module_id, error = %err, "classification fell back to unknown");
                ErrorClassification::unknown()
            }
        }
    }

    async fn try_classify(&self, error: &ErrorInfo, source: &ModuleSource) -> ClassifierResult<ErrorClassification> {
        if !self.is_initialized() {
            return Err(ClassifierError::NotInitialized);
        }

        let book = self.rules.read().await;
        let outcome = |family| {
            book.get(&family)
                .and_then(|rules| self.select(rules, error, source))
                .map(|rule| rule.rule().outcome)
        };

        let (rule_source, rule_type) = match outcome(RuleFamily::Classification) {
            Some(RuleOutcome::Classification { source, error_type }) => (Some(source), Some(error_type)),
            _ => (None, None),
        };
        let rule_severity = match outcome(RuleFamily::Severity) {
            Some(RuleOutcome::Severity { severity }) => Some(severity),
            _ => None,
        };
        let rule_impact = match outcome(RuleFamily::Impact) {
            Some(RuleOutcome::Impact { impact }) => Some(impact),
            _ => None,
        };
        let rule_recoverability = match outcome(RuleFamily::Recoverability) {
            Some(RuleOutcome::Recoverability { recoverability }) => Some(recoverability),
            _ => None,
        };

        let default = ErrorClassification::default_classification();
        let c = &self.counters;
        Ok(ErrorClassification::new(
            c.decide(rule_source, || heuristics::source(error), default.source),
            c.decide(rule_type, || heuristics::error_type(error), default.error_type),
            c.decide(rule_severity, || heuristics::severity(error), default.severity),
            c.decide(rule_impact, || heuristics::impact(error), default.impact),
            c.decide(
                rule_recoverability,
                || heuristics::recoverability(error),
                default.recoverability,
            ),
        ))
    }

    fn select<'a>(
        &self,
        rules: &'a [CompiledRule],
        error: &ErrorInfo,
        source: &ModuleSource,
    ) -> Option<&'a CompiledRule> {
        match self.config.match_order {
            MatchOrder::Registration => rules.iter().find(|r| r.matches(error, source)),
            MatchOrder::Priority => {
                let mut best: Option<&CompiledRule> = None;
                for rule in rules.iter().filter(|r| r.matches(error, source)) {
                    if best.is_none_or(|b| rule.rule().priority > b.rule().priority) {
                        best = Some(rule);
                    }
                }
                best
            }
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

/// Rules installed by `initialize()` when built-ins are enabled
#[must_use]
pub fn builtin_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            "builtin.connection_refused",
            "Connection refused",
            RuleOutcome::Classification {
                source: ErrorSource::Network,
                error_type: ErrorType::Network,
            },
        )
        .with_criterion(Criterion::message_contains("ECONNREFUSED")),
        ClassificationRule::new(
            "builtin.config_error",
            "Configuration error name",
            RuleOutcome::Classification {
                source: ErrorSource::Module,
                error_type: ErrorType::Configuration,
            },
        )
        .with_criterion(
            Criterion::new(CriterionField::Name, MatchOperator::Regex, r"Config(uration)?Error$"),
        ),
        ClassificationRule::new(
            "builtin.out_of_memory",
            "Out of memory",
            RuleOutcome::Severity {
                severity: Severity::Critical,
            },
        )
        .with_criterion(Criterion::message_contains("out of memory")),
        ClassificationRule::new(
            "builtin.permission_denied",
            "Permission denied",
            RuleOutcome::Recoverability {
                recoverability: Recoverability::NonRecoverable,
            },
        )
        .with_criterion(Criterion::message_contains("permission denied")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> ModuleSource {
        ModuleSource::new("auth", "Auth", "1.0.0")
    }

    fn severity_rule(id: &str, needle: &str, severity: Severity) -> ClassificationRule {
        ClassificationRule::new(id, id, RuleOutcome::Severity { severity })
            .with_criterion(Criterion::message_contains(needle))
    }

    async fn ready(config: ClassifierConfig) -> ErrorClassifier {
        let classifier = ErrorClassifier::new(config);
        classifier.initialize().await.unwrap();
        classifier
    }

    #[tokio::test]
    async fn test_uninitialized_falls_back_to_unknown() {
        let classifier = ErrorClassifier::default();
        let c = classifier
            .classify(&ErrorInfo::new("Network connection timeout", "Error"), &src())
            .await;
        assert_eq!(c, ErrorClassification::unknown());
        assert_eq!(classifier.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_heuristic_network_timeout() {
        let classifier = ready(ClassifierConfig::default()).await;
        let c = classifier
            .classify(&ErrorInfo::new("Network connection timeout", "Error"), &src())
            .await;
        assert_eq!(c.source, ErrorSource::Network);
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.recoverability, Recoverability::AutoRecoverable);
        assert_eq!(c.impact, Impact::SingleModule);
    }

    #[tokio::test]
    async fn test_default_classification() {
        let classifier = ready(ClassifierConfig::default()).await;
        let c = classifier.classify(&ErrorInfo::new("odd state", "Error"), &src()).await;
        assert_eq!(c, ErrorClassification::default_classification());
        assert_eq!(classifier.stats().defaulted, 5);
    }

    #[tokio::test]
    async fn test_rule_overrides_heuristic() {
        let classifier = ready(ClassifierConfig::default()).await;
        classifier
            .register_severity_rule(severity_rule("quiet-timeouts", "timeout", Severity::Low))
            .await
            .unwrap();
        let c = classifier.classify(&ErrorInfo::new("read timeout", "Error"), &src()).await;
        assert_eq!(c.severity, Severity::Low);
        assert!(classifier.stats().rule_hits >= 1);
    }

    #[tokio::test]
    async fn test_first_match_in_registration_order() {
        let classifier = ready(ClassifierConfig::default()).await;
        classifier
            .register_severity_rule(severity_rule("first", "disk", Severity::Low))
            .await
            .unwrap();
        classifier
            .register_severity_rule(severity_rule("second", "disk", Severity::Critical).with_priority(10))
            .await
            .unwrap();
        let c = classifier.classify(&ErrorInfo::new("disk slow", "Error"), &src()).await;
        assert_eq!(c.severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_priority_match_order() {
        let classifier = ready(ClassifierConfig::default().with_match_order(MatchOrder::Priority)).await;
        classifier
            .register_severity_rule(severity_rule("first", "disk", Severity::Low))
            .await
            .unwrap();
        classifier
            .register_severity_rule(severity_rule("second", "disk", Severity::Critical).with_priority(10))
            .await
            .unwrap();
        let c = classifier.classify(&ErrorInfo::new("disk slow", "Error"), &src()).await;
        assert_eq!(c.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_disabled_rule_skipped() {
        let classifier = ready(ClassifierConfig::default()).await;
        classifier
            .register_severity_rule(severity_rule("first", "disk", Severity::Low))
            .await
            .unwrap();
        classifier
            .register_severity_rule(severity_rule("second", "disk", Severity::Critical))
            .await
            .unwrap();
        classifier
            .set_rule_enabled(RuleFamily::Severity, "first", false)
            .await
            .unwrap();
        let c = classifier.classify(&ErrorInfo::new("disk slow", "Error"), &src()).await;
        assert_eq!(c.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let classifier = ready(ClassifierConfig::default()).await;
        let wrong = severity_rule("s", "x", Severity::Low);
        assert!(classifier.register_impact_rule(wrong).await.is_err());

        let ok = severity_rule("dup", "x", Severity::Low);
        classifier.register_severity_rule(ok.clone()).await.unwrap();
        assert_eq!(
            classifier.register_severity_rule(ok).await,
            Err(ClassifierError::DuplicateRule {
                rule_id: "dup".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_builtin_rules_and_shutdown() {
        let classifier = ready(ClassifierConfig::default()).await;
        assert_eq!(classifier.rule_count(RuleFamily::Classification).await, 2);

        let c = classifier
            .classify(&ErrorInfo::new("bad value", "ConfigurationError"), &src())
            .await;
        assert_eq!(c.error_type, ErrorType::Configuration);
        assert_eq!(c.source, ErrorSource::Module);

        classifier.shutdown().await;
        assert_eq!(classifier.rule_count(RuleFamily::Classification).await, 0);
        assert!(!classifier.is_initialized());
    }

    #[tokio::test]
    async fn test_remove_rule() {
        let classifier = ready(ClassifierConfig::default().with_builtin_rules(false)).await;
        classifier
            .register_severity_rule(severity_rule("r", "disk", Severity::Low))
            .await
            .unwrap();
        let removed = classifier.remove_rule(RuleFamily::Severity, "r").await.unwrap();
        assert_eq!(removed.id, "r");
        assert!(classifier.remove_rule(RuleFamily::Severity, "r").await.is_err());
        assert!(classifier.rules(RuleFamily::Severity).await.is_empty());
    }
}

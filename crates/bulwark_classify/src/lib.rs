//! BULWARK Error Classifier
//!
//! Assigns the five-dimension classification (source, type, severity, impact,
//! recoverability) to a raw failure. Registered rules decide first; keyword
//! heuristics fill any dimension no rule decided; the default classification
//! covers the rest. Classification never fails.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod error;
pub mod heuristics;
pub mod rule;

pub use classifier::{builtin_rules, ClassifierConfig, ClassifierStats, ErrorClassifier, MatchOrder};
pub use error::{ClassifierError, ClassifierResult};
pub use rule::{
    ClassificationRule, CompiledRule, Criterion, CriterionField, MatchOperator, RuleFamily,
    RuleOutcome,
};

//! Keyword fallbacks used when no rule in a family matches.

use bulwark_core::{ErrorInfo, ErrorSource, ErrorType, Impact, Recoverability, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

fn keywords(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("(?i){}", pattern)).ok()
}

fn hit(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

static NETWORK: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"network|connection|socket|dns|econn|unreachable"));
static SYSTEM: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"system|memory|disk|out of space|permission denied"));
static EXTERNAL: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"external|third[- ]party|upstream|\bapi\b"));

static CONFIGURATION: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"config|setting|missing option|invalid option"));
static RESOURCE: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"resource|quota|exhausted|limit exceeded|out of memory"));
static DEPENDENCY: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"dependency|depends on|module not found"));
static BUSINESS: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"business|validation|invalid input|not allowed"));

static CRITICAL: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"critical|fatal|crash|panic|corrupt"));
static HIGH: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"timeout|timed out|not found|unavailable|refused"));
static LOW: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"warning|deprecated|minor"));

static SYSTEM_WIDE: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"system[- ]wide|global|all modules|cluster"));
static MULTIPLE: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"multiple|cascade|shared|dependency"));

static NON_RECOVERABLE: Lazy<Option<Regex>> = Lazy::new(|| keywords(r"fatal|corrupt|unrecoverable|panic"));
static AUTO_RECOVERABLE: Lazy<Option<Regex>> =
    Lazy::new(|| keywords(r"timeout|timed out|retry|temporar|network|connection|unavailable"));

fn text(error: &ErrorInfo) -> String {
    format!("{} {}", error.name, error.message)
}

/// Source guess, `None` when nothing suggests one
#[must_use]
pub fn source(error: &ErrorInfo) -> Option<ErrorSource> {
    let text = text(error);
    if hit(&NETWORK, &text) {
        Some(ErrorSource::Network)
    } else if hit(&SYSTEM, &text) {
        Some(ErrorSource::System)
    } else if hit(&EXTERNAL, &text) {
        Some(ErrorSource::External)
    } else {
        None
    }
}

/// Type guess
#[must_use]
pub fn error_type(error: &ErrorInfo) -> Option<ErrorType> {
    let text = text(error);
    if hit(&NETWORK, &text) {
        Some(ErrorType::Network)
    } else if hit(&CONFIGURATION, &text) {
        Some(ErrorType::Configuration)
    } else if hit(&RESOURCE, &text) {
        Some(ErrorType::Resource)
    } else if hit(&DEPENDENCY, &text) {
        Some(ErrorType::Dependency)
    } else if hit(&BUSINESS, &text) {
        Some(ErrorType::Business)
    } else {
        None
    }
}

/// Severity guess
#[must_use]
pub fn severity(error: &ErrorInfo) -> Option<Severity> {
    let text = text(error);
    if hit(&CRITICAL, &text) {
        Some(Severity::Critical)
    } else if hit(&HIGH, &text) {
        Some(Severity::High)
    } else if hit(&LOW, &text) {
        Some(Severity::Low)
    } else {
        None
    }
}

/// Impact guess
#[must_use]
pub fn impact(error: &ErrorInfo) -> Option<Impact> {
    let text = text(error);
    if hit(&SYSTEM_WIDE, &text) {
        Some(Impact::SystemWide)
    } else if hit(&MULTIPLE, &text) {
        Some(Impact::MultipleModule)
    } else {
        None
    }
}

/// Recoverability guess
#[must_use]
pub fn recoverability(error: &ErrorInfo) -> Option<Recoverability> {
    let text = text(error);
    if hit(&NON_RECOVERABLE, &text) {
        Some(Recoverability::NonRecoverable)
    } else if hit(&AUTO_RECOVERABLE, &text) {
        Some(Recoverability::AutoRecoverable)
    } else {
        None
    }
}

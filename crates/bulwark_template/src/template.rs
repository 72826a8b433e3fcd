//! Response template model.

use crate::error::{TemplateError, TemplateResult};
use bulwark_core::{Condition, ErrorClassification, ErrorContext, ResponseStatus};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Computes a field of the rendered output from the data context
pub type DynamicFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Result block of a template; `code` and `message` may hold placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResultBlock {
    /// Response status
    pub status: ResponseStatus,
    /// Response code
    pub code: String,
    /// Message
    pub message: String,
    /// Details tree
    #[serde(default)]
    pub details: Value,
}

impl TemplateResultBlock {
    /// Create a result block
    #[must_use]
    pub fn new(status: ResponseStatus, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: Value::Null,
        }
    }

    /// Set details
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

fn default_cache_timeout() -> u64 {
    300_000
}

/// A blueprint for a standardized response
#[derive(Clone, Serialize, Deserialize)]
pub struct ResponseTemplate {
    /// Template id; also the lookup key for type/severity selection
    pub template_id: String,
    /// Display name
    pub name: String,
    /// Free-form grouping
    #[serde(default)]
    pub category: String,
    /// Conjunction of conditions; empty matches everything
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Result block
    pub result: TemplateResultBlock,
    /// Tree placed in `data.response`
    #[serde(default)]
    pub data: Value,
    /// Memoize rendered responses per error id
    #[serde(default)]
    pub cacheable: bool,
    /// Lifetime of a memoized response, in milliseconds
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout_ms: u64,
    /// Output paths (`result.message`, `data.hint`, ...) computed by functions
    #[serde(skip)]
    pub dynamic_content: IndexMap<String, DynamicFn>,
}

impl ResponseTemplate {
    /// Create an uncached template without conditions
    #[must_use]
    pub fn new(template_id: impl Into<String>, name: impl Into<String>, result: TemplateResultBlock) -> Self {
        Self {
            template_id: template_id.into(),
            name: name.into(),
            category: String::new(),
            conditions: Vec::new(),
            result,
            data: Value::Null,
            cacheable: false,
            cache_timeout_ms: default_cache_timeout(),
            dynamic_content: IndexMap::new(),
        }
    }

    /// Set category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Add a condition
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Set the data tree
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Enable caching with the given TTL
    #[must_use]
    pub fn cached(mut self, timeout_ms: u64) -> Self {
        self.cacheable = true;
        self.cache_timeout_ms = timeout_ms;
        self
    }

    /// Compute an output path with a function
    #[must_use]
    pub fn with_dynamic<F>(mut self, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.dynamic_content.insert(path.into(), Arc::new(f));
        self
    }

    /// Check the template is well formed
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::InvalidTemplate`] on any violation
    pub fn validate(&self) -> TemplateResult<()> {
        let id = self.template_id.as_str();
        if id.trim().is_empty() {
            return Err(TemplateError::invalid(id, "template_id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(TemplateError::invalid(id, "name must not be empty"));
        }
        if self.result.code.trim().is_empty() {
            return Err(TemplateError::invalid(id, "result code must not be empty"));
        }
        if self.cacheable && self.cache_timeout_ms == 0 {
            return Err(TemplateError::invalid(id, "cache_timeout_ms must be positive when cacheable"));
        }
        for condition in &self.conditions {
            condition
                .validate()
                .map_err(|e| TemplateError::invalid(id, e.to_string()))?;
        }
        for path in self.dynamic_content.keys() {
            if !(path.starts_with("result.") || path.starts_with("data.") || path == "data") {
                return Err(TemplateError::invalid(
                    id,
                    format!("dynamic path '{}' must start with result. or data.", path),
                ));
            }
        }
        Ok(())
    }

    /// Whether every condition holds for this error
    #[must_use]
    pub fn matches(&self, ctx: &ErrorContext, classification: &ErrorClassification) -> bool {
        bulwark_core::condition::all_match(&self.conditions, |field| {
            resolve_field(ctx, classification, field)
        })
    }
}

fn resolve_field(ctx: &ErrorContext, c: &ErrorClassification, field: &str) -> Option<Value> {
    match field {
        "moduleId" => Some(Value::String(ctx.source.module_id.clone())),
        "errorType" | "type" => Some(c.error_type.as_str().into()),
        "severity" => Some(c.severity.as_str().into()),
        "source" => Some(c.source.as_str().into()),
        "impact" => Some(c.impact.as_str().into()),
        "isUnderConstruction" => Some(
            ctx.lookup("isUnderConstruction")
                .unwrap_or(Value::Bool(false)),
        ),
        other => ctx.lookup(other),
    }
}

impl fmt::Debug for ResponseTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseTemplate")
            .field("template_id", &self.template_id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("conditions", &self.conditions.len())
            .field("cacheable", &self.cacheable)
            .field("cache_timeout_ms", &self.cache_timeout_ms)
            .field("dynamic_content", &self.dynamic_content.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Templates installed by `initialize()`
#[must_use]
pub fn builtin_templates() -> Vec<ResponseTemplate> {
    vec![
        ResponseTemplate::new(
            "default",
            "Default error response",
            TemplateResultBlock::new(
                ResponseStatus::Failure,
                "MODULE_ERROR",
                "{{module.name}} reported an error: {{error.message}}",
            )
            .with_details(serde_json::json!({
                "errorName": "{{error.name}}",
                "classification": "{{classification}}",
            })),
        )
        .with_category("general")
        .with_data(serde_json::json!({ "moduleId": "{{module.id}}", "handled": true })),
        ResponseTemplate::new(
            "network",
            "Network error response",
            TemplateResultBlock::new(
                ResponseStatus::Failure,
                "NETWORK_ERROR",
                "Network failure in {{module.name}}: {{error.message}}",
            )
            .with_details(serde_json::json!({ "retryable": true })),
        )
        .with_category("network")
        .with_data(serde_json::json!({ "moduleId": "{{module.id}}", "suggestion": "retry" })),
        ResponseTemplate::new(
            "critical",
            "Critical error response",
            TemplateResultBlock::new(
                ResponseStatus::Error,
                "CRITICAL_ERROR",
                "Critical failure in {{module.name}}: {{error.message}}",
            )
            .with_details(serde_json::json!({ "escalate": true })),
        )
        .with_category("critical")
        .with_data(serde_json::json!({ "moduleId": "{{module.id}}", "requiresAttention": true })),
        ResponseTemplate::new(
            "configuration",
            "Configuration error response",
            TemplateResultBlock::new(
                ResponseStatus::Failure,
                "CONFIGURATION_ERROR",
                "Configuration problem in {{module.name}}: {{error.message}}",
            ),
        )
        .with_category("configuration")
        .with_data(serde_json::json!({ "moduleId": "{{module.id}}", "suggestion": "check configuration" })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::{ConditionOperator, ErrorInfo, ErrorType, ModuleSource, Severity};
    use serde_json::json;

    fn ctx() -> ErrorContext {
        ErrorContext::new(
            "e1",
            ErrorInfo::new("boom", "Error"),
            ModuleSource::new("auth", "Auth", "1.0.0"),
        )
    }

    #[test]
    fn test_builtins_valid() {
        let builtins = builtin_templates();
        let ids: Vec<&str> = builtins.iter().map(|t| t.template_id.as_str()).collect();
        assert_eq!(ids, vec!["default", "network", "critical", "configuration"]);
        assert!(builtins.iter().all(|t| t.validate().is_ok()));
    }

    #[test]
    fn test_validate_rejects() {
        let ok = ResponseTemplate::new("t", "T", TemplateResultBlock::new(ResponseStatus::Failure, "X", "m"));
        assert!(ok.validate().is_ok());
        assert!(ok.clone().cached(0).validate().is_err());
        assert!(ok
            .clone()
            .with_dynamic("meta.x", |_| Ok(json!(1)))
            .validate()
            .is_err());
        let mut unnamed = ok;
        unnamed.name = String::new();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_conditions() {
        let classification = ErrorClassification::default()
            .with_type(ErrorType::Network)
            .with_severity(Severity::High);
        let template = ResponseTemplate::new("t", "T", TemplateResultBlock::new(ResponseStatus::Failure, "X", "m"))
            .with_condition(Condition::equals("moduleId", "auth"))
            .with_condition(Condition::equals("errorType", "network"))
            .with_condition(Condition::equals("isUnderConstruction", false));
        assert!(template.matches(&ctx(), &classification));

        let building = ctx().with_config("isUnderConstruction", json!(true));
        assert!(!template.matches(&building, &classification));

        let unknown_op = ResponseTemplate::new("t", "T", TemplateResultBlock::new(ResponseStatus::Failure, "X", "m"))
            .with_condition(Condition::new("severity", ConditionOperator::Unknown, json!("high")));
        assert!(!unknown_op.matches(&ctx(), &classification));
    }

    #[test]
    fn test_serde_skips_dynamic() {
        let template = ResponseTemplate::new("t", "T", TemplateResultBlock::new(ResponseStatus::Retry, "X", "m"))
            .with_dynamic("data.now", |_| Ok(json!(1)));
        let json = serde_json::to_value(&template).unwrap();
        assert!(json.get("dynamic_content").is_none());
        assert_eq!(json["result"]["status"], "retry");

        let back: ResponseTemplate = serde_json::from_value(json).unwrap();
        assert!(back.dynamic_content.is_empty());
        assert_eq!(back.cache_timeout_ms, 300_000);
    }
}

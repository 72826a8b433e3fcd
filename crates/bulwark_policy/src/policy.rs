//! Error policies.

use crate::circuit::CircuitBreakerConfig;
use crate::error::{PolicyError, PolicyResult};
use crate::retry::RetryConfig;
use bulwark_core::{Condition, ErrorContext, ErrorResponse, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fallback configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Whether the fallback applies
    pub enabled: bool,
    /// Replacement for `data.response`
    #[serde(default)]
    pub response: Value,
    /// Replacement result message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FallbackConfig {
    /// Enabled fallback returning `response`
    #[must_use]
    pub fn new(response: Value) -> Self {
        Self {
            enabled: true,
            response,
            message: None,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Channels notified, one action each
    pub channels: Vec<String>,
    /// Severities that notify; empty means all
    #[serde(default)]
    pub severities: Vec<Severity>,
}

impl NotificationConfig {
    /// Whether `severity` should notify
    #[must_use]
    pub fn covers(&self, severity: Severity) -> bool {
        self.severities.is_empty() || self.severities.contains(&severity)
    }
}

/// Policy kind together with its configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Retry with backoff
    Retry(RetryConfig),
    /// Replace the response
    Fallback(FallbackConfig),
    /// Circuit-break the module
    Isolation(CircuitBreakerConfig),
    /// Emit notify actions
    Notification(NotificationConfig),
    /// Emit a custom action carrying this opaque configuration
    Custom(Value),
}

impl PolicyConfig {
    /// Kind name
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Retry(_) => "retry",
            Self::Fallback(_) => "fallback",
            Self::Isolation(_) => "isolation",
            Self::Notification(_) => "notification",
            Self::Custom(_) => "custom",
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A resilience policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    /// Policy id
    pub policy_id: String,
    /// Display name
    pub name: String,
    /// Conjunction of conditions; empty matches everything
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Higher runs first
    #[serde(default)]
    pub priority: i32,
    /// Disabled policies never run
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Kind and configuration
    pub config: PolicyConfig,
}

impl ErrorPolicy {
    /// Create an enabled, unconditional policy
    #[must_use]
    pub fn new(policy_id: impl Into<String>, name: impl Into<String>, config: PolicyConfig) -> Self {
        Self {
            policy_id: policy_id.into(),
            name: name.into(),
            conditions: Vec::new(),
            priority: 0,
            enabled: true,
            config,
        }
    }

    /// Add a condition
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
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

    /// Check the policy is well formed
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPolicy`] on any violation
    pub fn validate(&self) -> PolicyResult<()> {
        let id = self.policy_id.as_str();
        if id.trim().is_empty() {
            return Err(PolicyError::invalid(id, "policy_id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(PolicyError::invalid(id, "name must not be empty"));
        }
        for condition in &self.conditions {
            condition
                .validate()
                .map_err(|e| PolicyError::invalid(id, e.to_string()))?;
        }
        match &self.config {
            PolicyConfig::Retry(retry) => {
                if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
                    return Err(PolicyError::invalid(id, "backoff_multiplier must be >= 1.0"));
                }
                if retry.max_delay_ms == 0 {
                    return Err(PolicyError::invalid(id, "max_delay_ms must be positive"));
                }
            }
            PolicyConfig::Isolation(breaker) if breaker.threshold == 0 => {
                return Err(PolicyError::invalid(id, "threshold must be at least 1"));
            }
            PolicyConfig::Notification(notify) if notify.channels.is_empty() => {
                return Err(PolicyError::invalid(id, "at least one channel is required"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether every condition holds for this context and response.
    ///
    /// Besides the context fields, conditions may name `code` and `status`
    /// of the response produced so far.
    #[must_use]
    pub fn matches(&self, ctx: &ErrorContext, response: &ErrorResponse) -> bool {
        bulwark_core::condition::all_match(&self.conditions, |field| match field {
            "code" | "resultCode" => Some(Value::String(response.result.code.clone())),
            "status" | "resultStatus" => serde_json::to_value(response.result.status).ok(),
            other => ctx.lookup(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::{ConditionOperator, ErrorClassification, ErrorInfo, ModuleSource};
    use serde_json::json;

    fn ctx() -> ErrorContext {
        ErrorContext::new(
            "e1",
            ErrorInfo::new("timeout", "Error"),
            ModuleSource::new("auth", "Auth", "1.0.0"),
        )
        .with_classification(ErrorClassification::default().with_severity(Severity::High))
    }

    #[test]
    fn test_policy_serde_shape() {
        let policy = ErrorPolicy::new(
            "iso",
            "Isolate",
            PolicyConfig::Isolation(CircuitBreakerConfig::new(3, 500)),
        );
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["config"]["type"], "isolation");
        assert_eq!(json["config"]["config"]["threshold"], 3);

        let back: ErrorPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_validate() {
        let ok = ErrorPolicy::new("r", "Retry", PolicyConfig::Retry(RetryConfig::default()));
        assert!(ok.validate().is_ok());

        let bad_multiplier = ErrorPolicy::new(
            "r",
            "Retry",
            PolicyConfig::Retry(RetryConfig::default().with_backoff_multiplier(0.5)),
        );
        assert!(bad_multiplier.validate().is_err());

        let no_channels = ErrorPolicy::new(
            "n",
            "Notify",
            PolicyConfig::Notification(NotificationConfig::default()),
        );
        assert!(no_channels.validate().is_err());

        let bad_condition = ok.clone().with_condition(Condition::new(
            "moduleId",
            ConditionOperator::Regex,
            json!("("),
        ));
        assert!(bad_condition.validate().is_err());

        let unnamed = ErrorPolicy::new("x", " ", PolicyConfig::Custom(json!({})));
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_matches_context_and_response() {
        let ctx = ctx();
        let response = ErrorResponse::processing_failed(
            &ctx,
            &bulwark_core::CoreError::Internal {
                message: "x".to_string(),
            },
        );
        let policy = ErrorPolicy::new("p", "P", PolicyConfig::Custom(json!(null)))
            .with_condition(Condition::equals("moduleId", "auth"))
            .with_condition(Condition::equals("code", "PROCESSING_FAILED"))
            .with_condition(Condition::equals("status", "failure"));
        assert!(policy.matches(&ctx, &response));

        let other = policy.clone().with_condition(Condition::one_of("severity", ["critical"]));
        assert!(!other.matches(&ctx, &response));
    }

    #[test]
    fn test_notification_covers() {
        let all = NotificationConfig {
            channels: vec!["ops".to_string()],
            severities: vec![],
        };
        assert!(all.covers(Severity::Low));

        let some = NotificationConfig {
            channels: vec!["ops".to_string()],
            severities: vec![Severity::Critical],
        };
        assert!(!some.covers(Severity::High));
    }
}

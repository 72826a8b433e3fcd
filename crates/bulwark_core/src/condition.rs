//! Field/operator/value conditions shared by policies, templates and handlers.
//!
//! Each component decides how a field name resolves against its context;
//! this module only evaluates an operator against the resolved value.

use crate::error::{CoreError, CoreResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Equal (string-insensitive to JSON type, `5` equals `"5"`)
    Equals,
    /// Not equal
    NotEquals,
    /// Substring, or array membership when the field is an array
    Contains,
    /// Negated `Contains`
    NotContains,
    /// Regular expression match
    Regex,
    /// String prefix
    StartsWith,
    /// String suffix
    EndsWith,
    /// Field is one of the values in an array
    In,
    /// Field is none of the values in an array
    NotIn,
    /// Numeric `>`
    GreaterThan,
    /// Numeric `<`
    LessThan,
    /// Numeric inclusive range: `{"min": a, "max": b}` or `[a, b]`
    Range,
    /// Any operator this build does not know; never matches
    #[serde(other)]
    Unknown,
}

/// A single condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field name, resolved by the owning component
    pub field: String,
    /// Operator
    pub operator: ConditionOperator,
    /// Expected value
    pub value: Value,
}

impl Condition {
    /// Create a condition
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Shorthand for an `equals` condition
    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::Equals, value.into())
    }

    /// Shorthand for an `in` condition
    #[must_use]
    pub fn one_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(
            field,
            ConditionOperator::In,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Check that the condition is well formed
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty field, an invalid regex, or a
    /// malformed set/range operand
    pub fn validate(&self) -> CoreResult<()> {
        if self.field.trim().is_empty() {
            return Err(CoreError::validation("condition.field", "must not be empty"));
        }
        match self.operator {
            ConditionOperator::Regex => {
                let pattern = self.value.as_str().ok_or_else(|| {
                    CoreError::validation("condition.value", "regex operand must be a string")
                })?;
                Regex::new(pattern)
                    .map_err(|e| CoreError::validation("condition.value", e.to_string()))?;
            }
            ConditionOperator::In | ConditionOperator::NotIn if !self.value.is_array() => {
                return Err(CoreError::validation(
                    "condition.value",
                    "set operand must be an array",
                ));
            }
            ConditionOperator::Range if range_bounds(&self.value).is_none() => {
                return Err(CoreError::validation(
                    "condition.value",
                    "range operand must be {min, max} or [min, max]",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Evaluate against a resolved field value (`None` if the field is absent)
    #[must_use]
    pub fn evaluate(&self, actual: Option<&Value>) -> bool {
        let Some(actual) = actual else {
            return matches!(
                self.operator,
                ConditionOperator::NotEquals | ConditionOperator::NotContains | ConditionOperator::NotIn
            );
        };

        match self.operator {
            ConditionOperator::Equals => loosely_equal(actual, &self.value),
            ConditionOperator::NotEquals => !loosely_equal(actual, &self.value),
            ConditionOperator::Contains => contains(actual, &self.value),
            ConditionOperator::NotContains => !contains(actual, &self.value),
            ConditionOperator::Regex => self
                .value
                .as_str()
                .and_then(|p| Regex::new(p).ok())
                .is_some_and(|re| re.is_match(&as_text(actual))),
            ConditionOperator::StartsWith => as_text(actual).starts_with(&as_text(&self.value)),
            ConditionOperator::EndsWith => as_text(actual).ends_with(&as_text(&self.value)),
            ConditionOperator::In => in_set(actual, &self.value),
            ConditionOperator::NotIn => self.value.is_array() && !in_set(actual, &self.value),
            ConditionOperator::GreaterThan => {
                compare(actual, &self.value).is_some_and(|(a, b)| a > b)
            }
            ConditionOperator::LessThan => {
                compare(actual, &self.value).is_some_and(|(a, b)| a < b)
            }
            ConditionOperator::Range => match (actual.as_f64(), range_bounds(&self.value)) {
                (Some(v), Some((min, max))) => {
                    min.is_none_or(|m| v >= m) && max.is_none_or(|m| v <= m)
                }
                _ => false,
            },
            ConditionOperator::Unknown => false,
        }
    }
}

/// Evaluate a conjunction of conditions with a field resolver
pub fn all_match<F>(conditions: &[Condition], mut resolve: F) -> bool
where
    F: FnMut(&str) -> Option<Value>,
{
    conditions
        .iter()
        .all(|c| c.evaluate(resolve(&c.field).as_ref()))
}

/// Textual form of a JSON value (strings unquoted)
#[must_use]
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || as_text(a) == as_text(b)
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        other => as_text(other).contains(&as_text(needle)),
    }
}

fn in_set(actual: &Value, set: &Value) -> bool {
    set.as_array()
        .is_some_and(|items| items.iter().any(|item| loosely_equal(actual, item)))
}

fn compare(actual: &Value, expected: &Value) -> Option<(f64, f64)> {
    Some((actual.as_f64()?, expected.as_f64()?))
}

type Bounds = (Option<f64>, Option<f64>);

fn range_bounds(value: &Value) -> Option<Bounds> {
    match value {
        Value::Object(obj) => {
            let min = obj.get("min").and_then(Value::as_f64);
            let max = obj.get("max").and_then(Value::as_f64);
            (min.is_some() || max.is_some()).then_some((min, max))
        }
        Value::Array(items) if items.len() == 2 => {
            Some((items[0].as_f64(), items[1].as_f64())).filter(|(a, b)| a.is_some() && b.is_some())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equals_loose() {
        let c = Condition::equals("retries", "5");
        assert!(c.evaluate(Some(&json!(5))));
        assert!(c.evaluate(Some(&json!("5"))));
        assert!(!c.evaluate(Some(&json!(6))));
    }

    #[test]
    fn test_missing_field() {
        let eq = Condition::equals("x", "a");
        let ne = Condition::new("x", ConditionOperator::NotEquals, json!("a"));
        let nc = Condition::new("x", ConditionOperator::NotContains, json!("a"));
        assert!(!eq.evaluate(None));
        assert!(ne.evaluate(None));
        assert!(nc.evaluate(None));
    }

    #[test]
    fn test_contains_string_and_array() {
        let c = Condition::new("tags", ConditionOperator::Contains, json!("db"));
        assert!(c.evaluate(Some(&json!(["net", "db"]))));
        assert!(c.evaluate(Some(&json!("mydb-primary"))));
        assert!(!c.evaluate(Some(&json!(["net"]))));
    }

    #[test]
    fn test_regex_and_affixes() {
        let re = Condition::new("moduleId", ConditionOperator::Regex, json!("^auth-\\d+$"));
        assert!(re.evaluate(Some(&json!("auth-12"))));
        assert!(!re.evaluate(Some(&json!("auth-x"))));

        let sw = Condition::new("moduleId", ConditionOperator::StartsWith, json!("auth"));
        let ew = Condition::new("moduleId", ConditionOperator::EndsWith, json!("12"));
        assert!(sw.evaluate(Some(&json!("auth-12"))));
        assert!(ew.evaluate(Some(&json!("auth-12"))));
    }

    #[test]
    fn test_set_membership() {
        let c = Condition::one_of("errorSeverity", ["high", "critical"]);
        assert!(c.evaluate(Some(&json!("critical"))));
        assert!(!c.evaluate(Some(&json!("low"))));

        let n = Condition::new("errorSeverity", ConditionOperator::NotIn, json!(["low"]));
        assert!(n.evaluate(Some(&json!("high"))));
        assert!(n.evaluate(None));
    }

    #[test]
    fn test_numeric_comparisons() {
        let gt = Condition::new("latency", ConditionOperator::GreaterThan, json!(100));
        assert!(gt.evaluate(Some(&json!(150))));
        assert!(!gt.evaluate(Some(&json!("fast"))));

        let range = Condition::new("latency", ConditionOperator::Range, json!({"min": 10, "max": 20}));
        assert!(range.evaluate(Some(&json!(10))));
        assert!(range.evaluate(Some(&json!(20))));
        assert!(!range.evaluate(Some(&json!(21))));

        let open = Condition::new("latency", ConditionOperator::Range, json!({"min": 10}));
        assert!(open.evaluate(Some(&json!(1_000_000))));

        let pair = Condition::new("latency", ConditionOperator::Range, json!([1, 2]));
        assert!(pair.evaluate(Some(&json!(1.5))));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        let c: Condition =
            serde_json::from_value(json!({"field": "moduleId", "operator": "fuzzy", "value": "a"}))
                .unwrap();
        assert_eq!(c.operator, ConditionOperator::Unknown);
        assert!(!c.evaluate(Some(&json!("a"))));
        assert!(!c.evaluate(None));
    }

    #[test]
    fn test_validate() {
        assert!(Condition::equals("", "x").validate().is_err());
        assert!(Condition::new("f", ConditionOperator::Regex, json!("(")).validate().is_err());
        assert!(Condition::new("f", ConditionOperator::In, json!("x")).validate().is_err());
        assert!(Condition::new("f", ConditionOperator::Range, json!("x")).validate().is_err());
        assert!(Condition::one_of("f", ["a"]).validate().is_ok());
    }

    #[test]
    fn test_all_match() {
        let conditions = vec![
            Condition::equals("moduleId", "auth"),
            Condition::one_of("errorSeverity", ["high"]),
        ];
        let hit = all_match(&conditions, |field| match field {
            "moduleId" => Some(json!("auth")),
            "errorSeverity" => Some(json!("high")),
            _ => None,
        });
        let miss = all_match(&conditions, |field| match field {
            "moduleId" => Some(json!("auth")),
            _ => None,
        });
        assert!(hit);
        assert!(!miss);
        assert!(all_match(&[], |_| None));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_negations_complement(actual in "[a-z ]{0,12}", expected in "[a-z ]{0,12}") {
                let actual = json!(actual);
                let equals = Condition::new("f", ConditionOperator::Equals, json!(expected.clone()));
                let not_equals = Condition::new("f", ConditionOperator::NotEquals, json!(expected.clone()));
                prop_assert_ne!(equals.evaluate(Some(&actual)), not_equals.evaluate(Some(&actual)));

                let contains = Condition::new("f", ConditionOperator::Contains, json!(expected.clone()));
                let not_contains = Condition::new("f", ConditionOperator::NotContains, json!(expected));
                prop_assert_ne!(contains.evaluate(Some(&actual)), not_contains.evaluate(Some(&actual)));
            }

            #[test]
            fn prop_missing_field_only_matches_negations(expected in "[a-z]{1,8}") {
                prop_assert!(!Condition::equals("f", expected.clone()).evaluate(None));
                prop_assert!(Condition::new("f", ConditionOperator::NotEquals, json!(expected)).evaluate(None));
            }
        }
    }
}

//! Placeholder substitution over JSON trees.
//!
//! A placeholder is `{{dot.path}}`. A string that is exactly one placeholder
//! takes the typed value at that path; placeholders embedded in longer text
//! are replaced by the value's text form. Placeholders whose path does not
//! resolve are left as written.

use bulwark_core::time::to_rfc3339;
use bulwark_core::{ErrorClassification, ErrorContext};
use serde_json::{json, Map, Value};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Data context placeholders resolve against.
///
/// Absent optional fields (stack, file name, line number) are left out so
/// their placeholders stay literal.
#[must_use]
pub fn data_context(ctx: &ErrorContext, classification: &ErrorClassification) -> Value {
    let mut error = Map::new();
    error.insert("id".into(), json!(ctx.error_id));
    error.insert("message".into(), json!(ctx.error.message));
    error.insert("name".into(), json!(ctx.error.name));
    if let Some(stack) = &ctx.error.stack {
        error.insert("stack".into(), json!(stack));
    }

    let mut module = Map::new();
    module.insert("id".into(), json!(ctx.source.module_id));
    module.insert("name".into(), json!(ctx.source.module_name));
    module.insert("version".into(), json!(ctx.source.version));
    if let Some(file_name) = &ctx.source.file_name {
        module.insert("fileName".into(), json!(file_name));
    }
    if let Some(line_number) = ctx.source.line_number {
        module.insert("lineNumber".into(), json!(line_number));
    }

    json!({
        "errorId": ctx.error_id,
        "moduleId": ctx.source.module_id,
        "timestamp": ctx.timestamp,
        "time": to_rfc3339(ctx.timestamp),
        "error": error,
        "module": module,
        "classification": classification,
        "data": ctx.data,
        "config": ctx.config,
    })
}

/// Value at a dot path; array elements are addressed by index
#[must_use]
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |value, key| match value {
        Value::Object(obj) => obj.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` at a dot path, creating intermediate objects.
///
/// Returns `false` when the path crosses a non-object value.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> bool {
    let mut keys = path.split('.').peekable();
    let mut current = root;
    while let Some(key) = keys.next() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(obj) = current else {
            return false;
        };
        if keys.peek().is_none() {
            obj.insert(key.to_string(), value);
            return true;
        }
        current = obj.entry(key.to_string()).or_insert(Value::Null);
    }
    false
}

fn single_placeholder(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    (!inner.contains(OPEN) && !inner.contains(CLOSE)).then(|| inner.trim())
}

/// Substitute placeholders inside one string
#[must_use]
pub fn render_str(text: &str, data: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        let path = after[..end].trim();
        match resolve_path(data, path) {
            Some(value) => out.push_str(&bulwark_core::condition::as_text(value)),
            None => out.push_str(&rest[start..start + OPEN.len() + end + CLOSE.len()]),
        }
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

/// Substitute placeholders throughout a tree, returning a new tree
#[must_use]
pub fn render_value(template: &Value, data: &Value) -> Value {
    match template {
        Value::String(text) => {
            if let Some(value) = single_placeholder(text).and_then(|path| resolve_path(data, path)) {
                return value.clone();
            }
            Value::String(render_str(text, data))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, data)).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), render_value(v, data)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::{ErrorInfo, ModuleSource};
    use proptest::prelude::*;

    fn data() -> Value {
        json!({
            "error": {"message": "disk full", "code": 28},
            "tags": ["io", "fs"],
            "empty": null,
        })
    }

    #[test]
    fn test_render_str() {
        let data = data();
        assert_eq!(render_str("Error: {{error.message}}!", &data), "Error: disk full!");
        assert_eq!(render_str("{{ error.code }}/{{tags.1}}", &data), "28/fs");
        assert_eq!(render_str("keep {{missing.path}}", &data), "keep {{missing.path}}");
        assert_eq!(render_str("open {{error.message", &data), "open {{error.message");
        assert_eq!(render_str("{{empty}}", &data), "null");
    }

    #[test]
    fn test_render_value_typed_and_nested() {
        let template = json!({
            "code": "{{error.code}}",
            "list": ["{{tags}}", "x {{tags.0}}"],
            "flag": true,
            "missing": "{{nope}}",
        });
        let out = render_value(&template, &data());
        assert_eq!(out["code"], json!(28));
        assert_eq!(out["list"][0], json!(["io", "fs"]));
        assert_eq!(out["list"][1], "x io");
        assert_eq!(out["flag"], true);
        assert_eq!(out["missing"], "{{nope}}");
        // input untouched
        assert_eq!(template["code"], "{{error.code}}");
    }

    #[test]
    fn test_set_path() {
        let mut root = json!({"result": {"message": "a"}});
        assert!(set_path(&mut root, "result.message", json!("b")));
        assert!(set_path(&mut root, "data.extra.depth", json!(1)));
        assert_eq!(root["result"]["message"], "b");
        assert_eq!(root["data"]["extra"]["depth"], 1);
        assert!(!set_path(&mut root, "result.message.inner", json!(2)));
    }

    #[test]
    fn test_data_context_shape() {
        let ctx = ErrorContext::new(
            "e1",
            ErrorInfo::new("boom", "TypeError"),
            ModuleSource::new("m", "Mod", "2.0.0"),
        )
        .with_data("userId", json!(7));
        let data = data_context(&ctx, &ErrorClassification::default());
        assert_eq!(data["error"]["message"], "boom");
        assert_eq!(data["module"]["version"], "2.0.0");
        assert_eq!(data["classification"]["severity"], "medium");
        assert_eq!(data["data"]["userId"], 7);
    }

    #[test]
    fn test_absent_optionals_stay_literal() {
        let template = "at {{module.fileName}}:{{module.lineNumber}} stack={{error.stack}}";
        let bare = ErrorContext::new("e1", ErrorInfo::new("boom", "Error"), ModuleSource::new("m", "Mod", "1.0.0"));
        let data = data_context(&bare, &ErrorClassification::default());
        assert_eq!(render_str(template, &data), template);
        assert!(data["error"].get("stack").is_none());

        let located = ErrorContext::new(
            "e2",
            ErrorInfo::new("boom", "Error").with_stack("main.rs:1"),
            ModuleSource::new("m", "Mod", "1.0.0").with_location("db.rs", 42),
        );
        let data = data_context(&located, &ErrorClassification::default());
        assert_eq!(render_str(template, &data), "at db.rs:42 stack=main.rs:1");
    }

    proptest! {
        #[test]
        fn prop_text_without_braces_is_unchanged(text in "[^{}]*") {
            prop_assert_eq!(render_str(&text, &data()), text);
        }
    }
}

//! Error contexts reported by modules.

use crate::classification::ErrorClassification;
use crate::response::ErrorResponse;
use crate::time::{Clock, Millis, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex};

/// The failure itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable message
    pub message: String,
    /// Error name or kind (e.g. `TimeoutError`)
    pub name: String,
    /// Stack trace or backtrace, if captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Create an error with a message and name
    #[must_use]
    pub fn new(message: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: name.into(),
            stack: None,
        }
    }

    /// Attach a stack trace
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl<E: std::error::Error> From<&E> for ErrorInfo {
    fn from(err: &E) -> Self {
        let name = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error")
            .to_string();
        Self::new(err.to_string(), name)
    }
}

/// The module that reported the failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSource {
    /// Module id
    pub module_id: String,
    /// Module display name
    pub module_name: String,
    /// Module version
    pub version: String,
    /// Source file, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Source line, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

impl ModuleSource {
    /// Create a module source
    #[must_use]
    pub fn new(
        module_id: impl Into<String>,
        module_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            module_name: module_name.into(),
            version: version.into(),
            file_name: None,
            line_number: None,
        }
    }

    /// Attach a source location
    #[must_use]
    pub fn with_location(mut self, file_name: impl Into<String>, line_number: u32) -> Self {
        self.file_name = Some(file_name.into());
        self.line_number = Some(line_number);
        self
    }
}

type CallbackFn = Box<dyn FnOnce(ErrorResponse) + Send + 'static>;

/// Once-only continuation invoked with the final response.
///
/// Clones share a single slot, so however many copies of a context exist the
/// callback runs at most once.
#[derive(Clone)]
pub struct ResponseCallback {
    slot: Arc<Mutex<Option<CallbackFn>>>,
}

impl ResponseCallback {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(ErrorResponse) + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(f)))),
        }
    }

    /// Invoke the callback if it has not run yet.
    ///
    /// Returns `true` if this call ran it.
    pub fn invoke(&self, response: ErrorResponse) -> bool {
        let taken = {
            let mut slot = self
                .slot
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            slot.take()
        };
        match taken {
            Some(f) => {
                f(response);
                true
            }
            None => false,
        }
    }

    /// Whether the callback already ran
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.is_none())
            .unwrap_or(true)
    }
}

impl fmt::Debug for ResponseCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCallback")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// A failure reported by a module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Error id, unique per reported failure
    pub error_id: String,
    /// The failure
    pub error: ErrorInfo,
    /// Reporting module
    pub source: ModuleSource,
    /// Classification, attached before enqueue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ErrorClassification>,
    /// Report time (ms since epoch)
    pub timestamp: Millis,
    /// Free-form payload
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Per-report configuration
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Completion callback for non-blocking submission
    #[serde(skip)]
    pub callback: Option<ResponseCallback>,
}

impl ErrorContext {
    /// Create a context stamped with the current time
    #[must_use]
    pub fn new(error_id: impl Into<String>, error: ErrorInfo, source: ModuleSource) -> Self {
        Self {
            error_id: error_id.into(),
            error,
            source,
            classification: None,
            timestamp: SystemClock.now_millis(),
            data: Map::new(),
            config: Map::new(),
            callback: None,
        }
    }

    /// Attach a classification
    #[must_use]
    pub fn with_classification(mut self, classification: ErrorClassification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Override the timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Millis) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a data entry
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Add a config entry
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Attach a completion callback
    #[must_use]
    pub fn with_callback(mut self, callback: ResponseCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Classification, or the default one when none was attached
    #[must_use]
    pub fn classification_or_default(&self) -> ErrorClassification {
        self.classification.unwrap_or_default()
    }

    /// Resolve a named field for condition matching.
    ///
    /// Known names cover the module and classification; anything else is a
    /// dot path into `data`, then `config`.
    #[must_use]
    pub fn lookup(&self, field: &str) -> Option<Value> {
        let classification = self.classification.as_ref();
        match field {
            "errorId" => Some(Value::String(self.error_id.clone())),
            "moduleId" => Some(Value::String(self.source.module_id.clone())),
            "moduleName" => Some(Value::String(self.source.module_name.clone())),
            "version" => Some(Value::String(self.source.version.clone())),
            "message" | "errorMessage" => Some(Value::String(self.error.message.clone())),
            "errorName" => Some(Value::String(self.error.name.clone())),
            "errorType" | "type" => classification.map(|c| c.error_type.as_str().into()),
            "errorSeverity" | "severity" => classification.map(|c| c.severity.as_str().into()),
            "errorSource" | "source" => classification.map(|c| c.source.as_str().into()),
            "errorImpact" | "impact" => classification.map(|c| c.impact.as_str().into()),
            "recoverability" => classification.map(|c| c.recoverability.as_str().into()),
            path => {
                let path = path.strip_prefix("data.").unwrap_or(path);
                resolve_in_map(&self.data, path)
                    .or_else(|| resolve_in_map(&self.config, path))
                    .cloned()
            }
        }
    }
}

fn resolve_in_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = map.get(parts.next()?)?;
    parts.try_fold(first, |value, key| match value {
        Value::Object(obj) => obj.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{ErrorSource, Severity};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_ctx() -> ErrorContext {
        ErrorContext::new(
            "err-1",
            ErrorInfo::new("Network connection timeout", "TimeoutError"),
            ModuleSource::new("net", "Network Module", "1.0.0"),
        )
    }

    #[test]
    fn test_context_builder() {
        let ctx = make_ctx()
            .with_data("retries", json!(2))
            .with_config("isUnderConstruction", json!(true));
        assert_eq!(ctx.error_id, "err-1");
        assert!(ctx.classification.is_none());
        assert_eq!(ctx.data.get("retries"), Some(&json!(2)));
        assert!(ctx.timestamp > 0);
    }

    #[test]
    fn test_lookup_known_fields() {
        let ctx = make_ctx().with_classification(
            ErrorClassification::default()
                .with_source(ErrorSource::Network)
                .with_severity(Severity::High),
        );
        assert_eq!(ctx.lookup("moduleId"), Some(json!("net")));
        assert_eq!(ctx.lookup("errorSeverity"), Some(json!("high")));
        assert_eq!(ctx.lookup("source"), Some(json!("network")));
    }

    #[test]
    fn test_lookup_classification_missing() {
        let ctx = make_ctx();
        assert_eq!(ctx.lookup("errorType"), None);
    }

    #[test]
    fn test_lookup_data_paths() {
        let ctx = make_ctx()
            .with_data("request", json!({"route": "/login", "hops": [1, 2]}))
            .with_config("isUnderConstruction", json!(false));
        assert_eq!(ctx.lookup("request.route"), Some(json!("/login")));
        assert_eq!(ctx.lookup("data.request.hops.1"), Some(json!(2)));
        assert_eq!(ctx.lookup("isUnderConstruction"), Some(json!(false)));
        assert_eq!(ctx.lookup("request.missing"), None);
    }

    #[test]
    fn test_callback_runs_once_across_clones() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback = ResponseCallback::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let ctx = make_ctx().with_callback(callback);
        let copy = ctx.clone();

        let response = ErrorResponse::queued(&ctx);
        assert!(ctx.callback.as_ref().unwrap().invoke(response.clone()));
        assert!(!copy.callback.as_ref().unwrap().invoke(response));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(copy.callback.as_ref().unwrap().is_consumed());
    }

    #[test]
    fn test_context_serde_skips_callback() {
        let ctx = make_ctx().with_callback(ResponseCallback::new(|_| {}));
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("callback").is_none());
        assert!(json.get("classification").is_none());

        let back: ErrorContext = serde_json::from_value(json).unwrap();
        assert!(back.callback.is_none());
        assert_eq!(back.error.message, "Network connection timeout");
    }

    #[test]
    fn test_error_info_from_std_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let info = ErrorInfo::from(&err);
        assert_eq!(info.message, "disk full");
        assert_eq!(info.name, "Error");
    }
}

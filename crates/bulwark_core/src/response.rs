//! Standardized responses, and the actions and annotations attached to them.

use crate::context::ErrorContext;
use crate::error::CoreError;
use crate::id::IdPrefix;
use crate::time::{Clock, Millis, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;

/// Result code of a hand-off response produced by a queue flush
pub const CODE_QUEUED: &str = "QUEUED";
/// Result code of a degraded response after a processing failure
pub const CODE_PROCESSING_FAILED: &str = "PROCESSING_FAILED";
/// Result code set by a retry policy
pub const CODE_RETRY_SCHEDULED: &str = "RETRY_SCHEDULED";
/// Result code set by a fallback policy
pub const CODE_FALLBACK_ACTIVATED: &str = "FALLBACK_ACTIVATED";
/// Result code set by an isolation policy when the breaker is open
pub const CODE_CIRCUIT_BREAKER_OPEN: &str = "CIRCUIT_BREAKER_OPEN";

/// Outcome status of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Handled
    Success,
    /// Handling failed
    Failure,
    /// Partially handled
    Partial,
    /// Retry scheduled
    Retry,
    /// Fallback payload served
    Fallback,
    /// Internal error while handling
    Error,
}

impl ResponseStatus {
    /// Whether this status counts as a failed outcome for health accounting
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Error)
    }
}

/// The `result` block of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
    /// Status
    pub status: ResponseStatus,
    /// Human-readable message
    pub message: String,
    /// Structured details
    #[serde(default)]
    pub details: Value,
    /// Machine-readable code
    pub code: String,
}

impl ResponseResult {
    /// Create a result
    #[must_use]
    pub fn new(status: ResponseStatus, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Value::Null,
            code: code.into(),
        }
    }

    /// Attach details
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// The `data` block of a response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseData {
    /// Reporting module name
    pub module_name: String,
    /// Reporting module id
    pub module_id: String,
    /// Handler- or policy-supplied payload
    #[serde(default)]
    pub response: Value,
    /// Configuration echoed back
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Side-effecting decision kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Log entry
    Log,
    /// Retry scheduled
    Retry,
    /// Fallback served
    Fallback,
    /// Module isolated
    Isolate,
    /// Notification sent
    Notify,
    /// Extension point
    Custom,
}

/// Lifecycle of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Not yet carried out
    Pending,
    /// Carried out
    Completed,
    /// Attempted and failed
    Failed,
}

/// A side-effecting decision recorded on a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action id
    pub action_id: String,
    /// Kind
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Target (module id, channel, ...)
    pub target: String,
    /// Payload
    #[serde(default)]
    pub payload: Value,
    /// Priority, higher first
    pub priority: i32,
    /// Status
    pub status: ActionStatus,
    /// Creation time (ms since epoch)
    pub timestamp: Millis,
}

impl Action {
    /// Create a pending action
    #[must_use]
    pub fn new(action_type: ActionType, target: impl Into<String>, payload: Value) -> Self {
        Self {
            action_id: IdPrefix::Action.generate(),
            action_type,
            target: target.into(),
            payload,
            priority: 0,
            status: ActionStatus::Pending,
            timestamp: SystemClock.now_millis(),
        }
    }

    /// Set priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Millis) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A free-form note attached to a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation id
    pub annotation_id: String,
    /// Kind (e.g. `policy`, `template`)
    #[serde(rename = "type")]
    pub annotation_type: String,
    /// Content
    pub content: Value,
    /// Creation time (ms since epoch)
    pub timestamp: Millis,
}

impl Annotation {
    /// Create an annotation
    #[must_use]
    pub fn new(annotation_type: impl Into<String>, content: Value) -> Self {
        Self {
            annotation_id: IdPrefix::Annotation.generate(),
            annotation_type: annotation_type.into(),
            content,
            timestamp: SystemClock.now_millis(),
        }
    }

    /// Set timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Millis) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Standardized response to a reported failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Response id
    pub response_id: String,
    /// Id of the error this answers
    pub error_id: String,
    /// Result block
    pub result: ResponseResult,
    /// Creation time (ms since epoch)
    pub timestamp: Millis,
    /// Time spent producing the response
    pub processing_time: Duration,
    /// Data block
    pub data: ResponseData,
    /// Recorded side-effecting decisions
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Notes
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl ErrorResponse {
    /// Create a response for `ctx` with the given result
    #[must_use]
    pub fn new(ctx: &ErrorContext, prefix: IdPrefix, result: ResponseResult) -> Self {
        Self {
            response_id: prefix.generate(),
            error_id: ctx.error_id.clone(),
            result,
            timestamp: SystemClock.now_millis(),
            processing_time: Duration::ZERO,
            data: ResponseData {
                module_name: ctx.source.module_name.clone(),
                module_id: ctx.source.module_id.clone(),
                response: Value::Null,
                config: ctx.config.clone(),
                metadata: Map::new(),
            },
            actions: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Successful response
    #[must_use]
    pub fn success(ctx: &ErrorContext, message: impl Into<String>) -> Self {
        Self::new(
            ctx,
            IdPrefix::Execution,
            ResponseResult::new(ResponseStatus::Success, "SUCCESS", message),
        )
    }

    /// Lightweight hand-off marker produced when a queued item is flushed
    #[must_use]
    pub fn queued(ctx: &ErrorContext) -> Self {
        let mut response = Self::new(
            ctx,
            IdPrefix::Queued,
            ResponseResult::new(
                ResponseStatus::Success,
                CODE_QUEUED,
                "Error queued for processing",
            ),
        );
        response.data.metadata.insert("queued".to_string(), json!(true));
        response
    }

    /// Degraded response after a failure anywhere in processing.
    ///
    /// The original error is preserved in `data.metadata.originalError`.
    #[must_use]
    pub fn processing_failed(ctx: &ErrorContext, err: &CoreError) -> Self {
        let mut response = Self::new(
            ctx,
            IdPrefix::Fallback,
            ResponseResult::new(
                ResponseStatus::Failure,
                CODE_PROCESSING_FAILED,
                format!("Failed to process error {}: {}", ctx.error_id, err),
            )
            .with_details(json!({ "reason": err.code() })),
        );
        response.data.metadata.insert(
            "originalError".to_string(),
            json!({
                "message": ctx.error.message,
                "name": ctx.error.name,
                "stack": ctx.error.stack,
            }),
        );
        response
            .data
            .metadata
            .insert("processingError".to_string(), json!(err.to_string()));
        response
    }

    /// Set the status and code in one step
    pub fn set_outcome(&mut self, status: ResponseStatus, code: &str) {
        self.result.status = status;
        self.result.code = code.to_string();
    }

    /// Append an action
    pub fn push_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Append an annotation
    pub fn push_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    /// Actions of a given kind
    pub fn actions_of(&self, action_type: ActionType) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(move |a| a.action_type == action_type)
    }

    /// Set processing time
    #[must_use]
    pub fn with_processing_time(mut self, processing_time: Duration) -> Self {
        self.processing_time = processing_time;
        self
    }
}

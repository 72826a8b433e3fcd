//! Response handlers and module registrations.

use crate::condition::Condition;
use crate::context::ErrorContext;
use crate::error::CoreResult;
use crate::response::ErrorResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Anything that can turn an [`ErrorContext`] into an [`ErrorResponse`].
///
/// Module-supplied handlers, the template-backed default handler and test
/// doubles are interchangeable implementations.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Stable handler id
    fn handle_id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Priority, higher first
    fn priority(&self) -> i32 {
        0
    }

    /// Disabled handlers are skipped by routing
    fn is_enabled(&self) -> bool {
        true
    }

    /// Conditions under which this handler applies
    fn conditions(&self) -> &[Condition] {
        &[]
    }

    /// Produce a response
    ///
    /// # Errors
    ///
    /// Returns error if the handler cannot process the context
    async fn execute(&self, ctx: &ErrorContext) -> CoreResult<ErrorResponse>;
}

/// Shared handler handle
pub type SharedHandler = Arc<dyn ResponseHandler>;

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = CoreResult<ErrorResponse>> + Send>>;
type HandlerFn = dyn Fn(ErrorContext) -> BoxedHandlerFuture + Send + Sync;

/// Adapter turning an async closure into a [`ResponseHandler`]
#[derive(Clone)]
pub struct FnHandler {
    handle_id: String,
    name: String,
    priority: i32,
    enabled: bool,
    conditions: Vec<Condition>,
    f: Arc<HandlerFn>,
}

impl FnHandler {
    /// Wrap a closure
    pub fn new<F, Fut>(handle_id: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<ErrorResponse>> + Send + 'static,
    {
        Self {
            handle_id: handle_id.into(),
            name: name.into(),
            priority: 0,
            enabled: true,
            conditions: Vec::new(),
            f: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
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

    /// Add a condition
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Convert into a shared handle
    #[must_use]
    pub fn shared(self) -> SharedHandler {
        Arc::new(self)
    }
}

#[async_trait]
impl ResponseHandler for FnHandler {
    fn handle_id(&self) -> &str {
        &self.handle_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    async fn execute(&self, ctx: &ErrorContext) -> CoreResult<ErrorResponse> {
        (self.f)(ctx.clone()).await
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("handle_id", &self.handle_id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// A module participating in error handling
#[derive(Clone, Serialize, Deserialize)]
pub struct ModuleRegistration {
    /// Module id
    pub module_id: String,
    /// Display name
    pub module_name: String,
    /// Free-form module kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_type: Option<String>,
    /// Version
    pub version: String,
    /// Module configuration
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Declared capabilities
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Ids of modules this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Module-specific handler
    #[serde(skip)]
    pub response_handler: Option<SharedHandler>,
}

impl ModuleRegistration {
    /// Create a registration
    #[must_use]
    pub fn new(
        module_id: impl Into<String>,
        module_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            module_name: module_name.into(),
            module_type: None,
            version: version.into(),
            config: Map::new(),
            capabilities: Vec::new(),
            dependencies: Vec::new(),
            response_handler: None,
        }
    }

    /// Set module type
    #[must_use]
    pub fn with_type(mut self, module_type: impl Into<String>) -> Self {
        self.module_type = Some(module_type.into());
        self
    }

    /// Add a dependency
    #[must_use]
    pub fn with_dependency(mut self, module_id: impl Into<String>) -> Self {
        self.dependencies.push(module_id.into());
        self
    }

    /// Add a capability
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Attach a handler
    #[must_use]
    pub fn with_handler(mut self, handler: SharedHandler) -> Self {
        self.response_handler = Some(handler);
        self
    }
}

impl fmt::Debug for ModuleRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistration")
            .field("module_id", &self.module_id)
            .field("module_name", &self.module_name)
            .field("module_type", &self.module_type)
            .field("version", &self.version)
            .field("capabilities", &self.capabilities)
            .field("dependencies", &self.dependencies)
            .field(
                "response_handler",
                &self.response_handler.as_ref().map(|h| h.name().to_string()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ErrorInfo, ModuleSource};
    use crate::error::CoreError;

    fn make_ctx() -> ErrorContext {
        ErrorContext::new(
            "e1",
            ErrorInfo::new("bad", "Error"),
            ModuleSource::new("m1", "Module One", "1.0.0"),
        )
    }

    #[tokio::test]
    async fn test_fn_handler_execute() {
        let handler = FnHandler::new("h1", "echo", |ctx: ErrorContext| async move {
            Ok(ErrorResponse::success(&ctx, format!("handled {}", ctx.error_id)))
        });
        assert_eq!(handler.handle_id(), "h1");
        assert!(handler.is_enabled());

        let response = handler.execute(&make_ctx()).await.unwrap();
        assert_eq!(response.result.message, "handled e1");
    }

    #[tokio::test]
    async fn test_fn_handler_error() {
        let handler = FnHandler::new("h2", "failing", |_ctx: ErrorContext| async move {
            Err(CoreError::Handler {
                handler: "failing".to_string(),
                message: "nope".to_string(),
            })
        })
        .with_enabled(false)
        .with_priority(3);

        assert!(!handler.is_enabled());
        assert_eq!(handler.priority(), 3);
        assert!(handler.execute(&make_ctx()).await.is_err());
    }

    #[test]
    fn test_registration_builder() {
        let reg = ModuleRegistration::new("billing", "Billing", "3.1.0")
            .with_type("service")
            .with_dependency("db")
            .with_capability("invoices");
        assert_eq!(reg.dependencies, vec!["db"]);
        assert!(reg.response_handler.is_none());
        assert!(format!("{:?}", reg).contains("billing"));
    }

    #[test]
    fn test_registration_serde_skips_handler() {
        let handler = FnHandler::new("h", "h", |ctx: ErrorContext| async move {
            Ok(ErrorResponse::success(&ctx, "ok"))
        })
        .shared();
        let reg = ModuleRegistration::new("a", "A", "1").with_handler(handler);
        let json = serde_json::to_value(&reg).unwrap();
        assert!(json.get("response_handler").is_none());
        let back: ModuleRegistration = serde_json::from_value(json).unwrap();
        assert!(back.response_handler.is_none());
    }
}

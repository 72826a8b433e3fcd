//! Built-in response handlers.

use async_trait::async_trait;
use bulwark_core::{CoreResult, ErrorContext, ErrorResponse, ResponseHandler};
use bulwark_template::ResponseTemplateManager;
use std::sync::Arc;

/// Default handler: answers every error from the matching response template
#[derive(Debug, Clone)]
pub struct TemplateResponseHandler {
    templates: Arc<ResponseTemplateManager>,
}

impl TemplateResponseHandler {
    /// Handler id
    pub const HANDLE_ID: &'static str = "default.template";

    /// Create a handler backed by `templates`
    #[must_use]
    pub fn new(templates: Arc<ResponseTemplateManager>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl ResponseHandler for TemplateResponseHandler {
    fn handle_id(&self) -> &str {
        Self::HANDLE_ID
    }

    fn name(&self) -> &str {
        "TemplateResponseHandler"
    }

    async fn execute(&self, ctx: &ErrorContext) -> CoreResult<ErrorResponse> {
        Ok(self.templates.respond(ctx).await?)
    }
}

//! Handler execution with panic isolation and policy enrichment.

use bulwark_core::{CoreError, ErrorContext, ErrorResponse, IdPrefix, SharedHandler};
use bulwark_policy::PolicyEngine;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Runs handlers and passes their responses through the policy engine
#[derive(Debug, Default)]
pub struct ResponseExecutor {
    policies: Option<Arc<PolicyEngine>>,
}

impl ResponseExecutor {
    /// Executor without policies
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor that applies `policies` to every response
    #[must_use]
    pub fn with_policies(policies: Arc<PolicyEngine>) -> Self {
        Self {
            policies: Some(policies),
        }
    }

    /// Run `handler` for `ctx`.
    ///
    /// Never fails: a handler error or panic becomes a `PROCESSING_FAILED`
    /// response, and a policy engine error leaves the response unenriched.
    pub async fn execute(&self, ctx: &ErrorContext, handler: &SharedHandler) -> ErrorResponse {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(handler.execute(ctx)).catch_unwind().await;
        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(error_id = %ctx.error_id, handler = handler.name(), error = %err, "handler failed");
                ErrorResponse::processing_failed(ctx, &err)
            }
            Err(payload) => {
                let err = CoreError::Handler {
                    handler: handler.name().to_string(),
                    message: panic_message(payload.as_ref()),
                };
                warn!(error_id = %ctx.error_id, handler = handler.name(), error = %err, "handler panicked");
                ErrorResponse::processing_failed(ctx, &err)
            }
        };
        response.response_id = IdPrefix::Execution.generate();
        response.processing_time = started.elapsed();

        let Some(engine) = &self.policies else {
            return response;
        };
        match engine.execute_policies(ctx, response.clone()).await {
            Ok(enriched) => {
                debug!(
                    error_id = %ctx.error_id,
                    actions = enriched.actions.len(),
                    "policies applied"
                );
                enriched
            }
            Err(err) => {
                warn!(error_id = %ctx.error_id, error = %err, "policy engine unavailable");
                response
            }
        }
    }

    /// Run `handler` for each context in order; one failure never affects
    /// the others
    pub async fn execute_batch(&self, contexts: &[ErrorContext], handler: &SharedHandler) -> Vec<ErrorResponse> {
        let mut responses = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            responses.push(self.execute(ctx, handler).await);
        }
        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::response::CODE_PROCESSING_FAILED;
    use bulwark_core::{ErrorInfo, FnHandler, ModuleSource, ResponseStatus};
    use bulwark_policy::{ErrorPolicy, PolicyConfig, PolicyEngineConfig, RetryConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(id: &str) -> ErrorContext {
        ErrorContext::new(id, ErrorInfo::new("boom", "Error"), ModuleSource::new("m", "M", "1.0.0"))
    }

    fn ok_handler() -> SharedHandler {
        FnHandler::new("ok", "Ok", |ctx: ErrorContext| async move {
            Ok(ErrorResponse::success(&ctx, "handled"))
        })
        .shared()
    }

    #[tokio::test]
    async fn test_execute_stamps_id_and_time() {
        let executor = ResponseExecutor::new();
        let response = executor.execute(&ctx("e1"), &ok_handler()).await;
        assert!(response.response_id.starts_with("exec_"));
        assert_eq!(response.result.status, ResponseStatus::Success);
        assert_eq!(response.error_id, "e1");
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_isolated() {
        let executor = ResponseExecutor::new();
        let failing = FnHandler::new("bad", "Bad", |_ctx: ErrorContext| async move {
            Err::<ErrorResponse, _>(CoreError::Internal {
                message: "db down".to_string(),
            })
        })
        .shared();
        let response = executor.execute(&ctx("e1"), &failing).await;
        assert_eq!(response.result.code, CODE_PROCESSING_FAILED);
        assert_eq!(response.data.metadata["originalError"]["message"], "boom");

        let panicking = FnHandler::new("panic", "Panic", |ctx: ErrorContext| async move {
            if ctx.error_id == "e2" {
                panic!("handler exploded");
            }
            Ok(ErrorResponse::success(&ctx, "not reached"))
        })
        .shared();
        let response = executor.execute(&ctx("e2"), &panicking).await;
        assert_eq!(response.result.code, CODE_PROCESSING_FAILED);
        assert!(response.result.message.contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_batch_isolation_preserves_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = FnHandler::new("flaky", "Flaky", move |ctx: ErrorContext| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 1 {
                    Err(CoreError::Internal {
                        message: "second call fails".to_string(),
                    })
                } else {
                    Ok(ErrorResponse::success(&ctx, "ok"))
                }
            }
        })
        .shared();

        let executor = ResponseExecutor::new();
        let contexts = [ctx("a"), ctx("b"), ctx("c")];
        let responses = executor.execute_batch(&contexts, &handler).await;
        let ids: Vec<&str> = responses.iter().map(|r| r.error_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(responses[0].result.status, ResponseStatus::Success);
        assert_eq!(responses[1].result.code, CODE_PROCESSING_FAILED);
        assert_eq!(responses[2].result.status, ResponseStatus::Success);
    }

    #[tokio::test]
    async fn test_policies_enrich_failures() {
        let engine = Arc::new(PolicyEngine::new(PolicyEngineConfig::default().with_cleanup_interval(0)));
        engine.initialize().await;
        engine
            .register_policy(ErrorPolicy::new("retry", "Retry", PolicyConfig::Retry(RetryConfig::default())))
            .await
            .unwrap();
        let executor = ResponseExecutor::with_policies(engine);
        let failing = FnHandler::new("bad", "Bad", |_ctx: ErrorContext| async move {
            Err::<ErrorResponse, _>(CoreError::Internal {
                message: "db down".to_string(),
            })
        })
        .shared();
        let response = executor.execute(&ctx("e1"), &failing).await;
        assert_eq!(response.result.status, ResponseStatus::Retry);
        assert_eq!(response.actions.len(), 1);
    }
}

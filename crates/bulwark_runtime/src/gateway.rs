//! The error interface gateway.
//!
//! Entry point for reported failures. Each error is classified (when a
//! classifier is attached and the context carries no classification),
//! enqueued, routed to a handler and executed; the registry, when attached,
//! records the outcome against the reporting module.
//!
//! Three submission modes share one pipeline:
//! - [`ErrorInterfaceGateway::handle_error`] waits for the response,
//! - [`ErrorInterfaceGateway::handle_error_async`] returns a
//!   [`PendingResponse`] and is the only mode that fires the context's
//!   callback,
//! - [`ErrorInterfaceGateway::handle_batch_errors`] answers a slice in order.

use crate::executor::ResponseExecutor;
use crate::router::{ResponseRouterEngine, RouterStatus};
use bulwark_classify::ErrorClassifier;
use bulwark_core::bus::{EVENT_MODULE_REGISTERED, EVENT_MODULE_UNREGISTERED};
use bulwark_core::response::CODE_PROCESSING_FAILED;
use bulwark_core::{
    CoreError, CoreResult, ErrorContext, ErrorResponse, MessageBus, ModuleRegistration, NoopBus,
};
use bulwark_queue::{ErrorQueueManager, QueueStatus};
use bulwark_registry::{ModuleRegistryManager, RegistryError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Gateway counters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GatewayMetrics {
    /// Errors answered
    pub processed: u64,
    /// Answers whose status is not a failure
    pub succeeded: u64,
    /// Answers synthesized after a processing failure
    pub degraded: u64,
    /// Errors submitted in non-blocking mode
    pub submitted_async: u64,
    /// Batch calls
    pub batches: u64,
    /// `succeeded / processed`, zero before the first answer
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    degraded: AtomicU64,
    submitted_async: AtomicU64,
    batches: AtomicU64,
}

impl Counters {
    fn record(&self, response: &ErrorResponse) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if !response.result.status.is_failure() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        if response.result.code == CODE_PROCESSING_FAILED {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> GatewayMetrics {
        let processed = self.processed.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        GatewayMetrics {
            processed,
            succeeded,
            degraded: self.degraded.load(Ordering::Relaxed),
            submitted_async: self.submitted_async.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            success_rate: if processed == 0 {
                0.0
            } else {
                succeeded as f64 / processed as f64
            },
        }
    }
}

/// Gateway snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Whether `initialize()` has run
    pub is_initialized: bool,
    /// Queue snapshot (empty default before initialization)
    pub queue_status: QueueStatus,
    /// Router snapshot
    pub router_status: RouterStatus,
    /// Counters
    pub metrics: GatewayMetrics,
}

/// Response of a non-blocking submission
#[derive(Debug)]
pub struct PendingResponse {
    error_id: String,
    receiver: oneshot::Receiver<ErrorResponse>,
}

impl PendingResponse {
    /// Id of the submitted error
    #[must_use]
    pub fn error_id(&self) -> &str {
        &self.error_id
    }

    /// Wait for the response
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if processing was aborted
    pub async fn wait(self) -> CoreResult<ErrorResponse> {
        self.receiver.await.map_err(|_| CoreError::Cancelled)
    }
}

struct GatewayInner {
    queue: Arc<ErrorQueueManager>,
    router: Arc<ResponseRouterEngine>,
    executor: Arc<ResponseExecutor>,
    classifier: Option<Arc<ErrorClassifier>>,
    registry: Option<Arc<ModuleRegistryManager>>,
    bus: Arc<dyn MessageBus>,
    initialized: AtomicBool,
    counters: Counters,
}

/// Builder for [`ErrorInterfaceGateway`]
pub struct GatewayBuilder {
    queue: Arc<ErrorQueueManager>,
    router: Arc<ResponseRouterEngine>,
    executor: Arc<ResponseExecutor>,
    classifier: Option<Arc<ErrorClassifier>>,
    registry: Option<Arc<ModuleRegistryManager>>,
    bus: Arc<dyn MessageBus>,
}

impl GatewayBuilder {
    /// Classify unclassified errors with `classifier`
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Keep module registrations and health in `registry`
    #[must_use]
    pub fn registry(mut self, registry: Arc<ModuleRegistryManager>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Announce module lifecycle events on `bus`
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Build an uninitialized gateway
    #[must_use]
    pub fn build(self) -> ErrorInterfaceGateway {
        ErrorInterfaceGateway {
            inner: Arc::new(GatewayInner {
                queue: self.queue,
                router: self.router,
                executor: self.executor,
                classifier: self.classifier,
                registry: self.registry,
                bus: self.bus,
                initialized: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }
}

/// Orchestrates classification, queueing, routing and execution
#[derive(Clone)]
pub struct ErrorInterfaceGateway {
    inner: Arc<GatewayInner>,
}

impl ErrorInterfaceGateway {
    /// Start building a gateway from its mandatory parts
    #[must_use]
    pub fn builder(
        queue: Arc<ErrorQueueManager>,
        router: Arc<ResponseRouterEngine>,
        executor: Arc<ResponseExecutor>,
    ) -> GatewayBuilder {
        GatewayBuilder {
            queue,
            router,
            executor,
            classifier: None,
            registry: None,
            bus: Arc::new(NoopBus),
        }
    }

    /// Start the queue and accept errors. Idempotent.
    pub async fn initialize(&self) {
        if self.inner.initialized.load(Ordering::Acquire) {
            return;
        }
        self.inner.queue.initialize().await;
        self.inner.initialized.store(true, Ordering::Release);
        info!(
            classifier = self.inner.classifier.is_some(),
            registry = self.inner.registry.is_some(),
            "error interface gateway initialized"
        );
    }

    /// Stop accepting errors and drain the queue.
    ///
    /// Returns the hand-off responses of errors still queued. Idempotent.
    pub async fn shutdown(&self) -> Vec<ErrorResponse> {
        if !self.inner.initialized.swap(false, Ordering::AcqRel) {
            return Vec::new();
        }
        let drained = self.inner.queue.shutdown().await;
        info!(drained = drained.len(), "error interface gateway shut down");
        drained
    }

    /// Whether `initialize()` has run
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> CoreResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CoreError::not_initialized("ErrorInterfaceGateway"))
        }
    }

    /// Handle one error and wait for the response.
    ///
    /// Processing failures never surface as `Err`; they come back as a
    /// `PROCESSING_FAILED` response. The context's callback is not invoked;
    /// the response is the return value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before `initialize()`
    pub async fn handle_error(&self, ctx: ErrorContext) -> CoreResult<ErrorResponse> {
        self.ensure_initialized()?;
        let started = Instant::now();
        let admitted = self.admit(ctx).await;
        let (_, response) = self.run(admitted, started).await;
        Ok(response)
    }

    /// Enqueue an error and process it in the background.
    ///
    /// The response is delivered once through the returned
    /// [`PendingResponse`] and the context's callback, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before `initialize()`
    pub async fn handle_error_async(&self, ctx: ErrorContext) -> CoreResult<PendingResponse> {
        self.ensure_initialized()?;
        let started = Instant::now();
        self.inner.counters.submitted_async.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let error_id = ctx.error_id.clone();

        let admitted = self.admit(ctx).await;
        let gateway = self.clone();
        tokio::spawn(async move {
            let (ctx, response) = gateway.run(admitted, started).await;
            if let Some(callback) = &ctx.callback {
                callback.invoke(response.clone());
            }
            if sender.send(response).is_err() {
                debug!("pending response dropped before delivery");
            }
        });

        Ok(PendingResponse { error_id, receiver })
    }

    /// Handle several errors one after another in input order; one failing
    /// error never affects the others. Callbacks are not invoked.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before `initialize()`
    pub async fn handle_batch_errors(&self, contexts: Vec<ErrorContext>) -> CoreResult<Vec<ErrorResponse>> {
        self.ensure_initialized()?;
        self.inner.counters.batches.fetch_add(1, Ordering::Relaxed);
        let count = contexts.len();
        let mut responses = Vec::with_capacity(count);
        for ctx in contexts {
            let started = Instant::now();
            let admitted = self.admit(ctx).await;
            let (_, response) = self.run(admitted, started).await;
            responses.push(response);
        }
        debug!(count, "batch handled");
        Ok(responses)
    }

    /// Classify if needed, then enqueue. On enqueue failure the degraded
    /// response is returned alongside the context.
    async fn admit(&self, mut ctx: ErrorContext) -> Result<ErrorContext, (ErrorContext, ErrorResponse)> {
        if ctx.classification.is_none() {
            if let Some(classifier) = &self.inner.classifier {
                ctx.classification = Some(classifier.classify(&ctx.error, &ctx.source).await);
            }
        }
        match self.inner.queue.enqueue(ctx.clone()).await {
            Ok(outcome) => {
                if !outcome.accepted {
                    warn!(error_id = %ctx.error_id, "queue full, error processed without queueing");
                }
                Ok(ctx)
            }
            Err(err) => {
                let err = CoreError::from(err);
                warn!(error_id = %ctx.error_id, error = %err, "enqueue failed");
                let response = ErrorResponse::processing_failed(&ctx, &err);
                Err((ctx, response))
            }
        }
    }

    /// Process an admitted error, or finish the degraded response of one
    /// that could not be enqueued
    async fn run(
        &self,
        admitted: Result<ErrorContext, (ErrorContext, ErrorResponse)>,
        started: Instant,
    ) -> (ErrorContext, ErrorResponse) {
        match admitted {
            Ok(ctx) => {
                let response = self.process(&ctx).await;
                let response = self.finish(&ctx, response, started).await;
                (ctx, response)
            }
            Err((ctx, response)) => {
                let response = self.finish(&ctx, response, started).await;
                (ctx, response)
            }
        }
    }

    async fn process(&self, ctx: &ErrorContext) -> ErrorResponse {
        let handler = self.inner.router.route(ctx).await;
        self.inner.executor.execute(ctx, &handler).await
    }

    /// Stamp total time and record the outcome
    async fn finish(&self, ctx: &ErrorContext, mut response: ErrorResponse, started: Instant) -> ErrorResponse {
        response.processing_time = started.elapsed();
        self.inner.counters.record(&response);
        self.record_health(ctx, &response).await;
        debug!(
            error_id = %ctx.error_id,
            status = ?response.result.status,
            code = %response.result.code,
            elapsed_us = response.processing_time.as_micros() as u64,
            "error handled"
        );
        response
    }

    async fn record_health(&self, ctx: &ErrorContext, response: &ErrorResponse) {
        let Some(registry) = &self.inner.registry else {
            return;
        };
        let module_id = ctx.source.module_id.as_str();
        let outcome = if response.result.status.is_failure() {
            registry.increment_error_count(module_id).await
        } else {
            registry.increment_success_count(module_id).await
        };
        if let Err(err) = outcome {
            debug!(module_id, error = %err, "module health not recorded");
        }
    }

    /// Register a module with the router (and registry, when attached) and
    /// announce it on the bus
    ///
    /// # Errors
    ///
    /// Returns error if not initialized or the registration is rejected
    pub async fn register_module(&self, registration: ModuleRegistration) -> CoreResult<()> {
        self.ensure_initialized()?;
        if let Some(registry) = &self.inner.registry {
            registry.register_module(registration.clone()).await?;
        }
        if let Err(err) = self.inner.router.register_module(&registration).await {
            if let Some(registry) = &self.inner.registry {
                if let Err(rollback) = registry.unregister_module(&registration.module_id).await {
                    warn!(
                        module_id = %registration.module_id,
                        error = %rollback,
                        "registry rollback failed, module left half-registered"
                    );
                }
            }
            return Err(err);
        }
        self.announce(
            EVENT_MODULE_REGISTERED,
            json!({
                "moduleId": registration.module_id,
                "moduleName": registration.module_name,
                "version": registration.version,
            }),
        )
        .await;
        Ok(())
    }

    /// Remove a module from the router and registry and announce it
    ///
    /// # Errors
    ///
    /// Returns error if not initialized or neither knew the module
    pub async fn unregister_module(&self, module_id: &str) -> CoreResult<()> {
        self.ensure_initialized()?;
        let routed = self.inner.router.unregister_module(module_id).await;
        let registered = match &self.inner.registry {
            Some(registry) => match registry.unregister_module(module_id).await {
                Ok(_) => true,
                Err(RegistryError::ModuleNotFound { .. }) => false,
                Err(err) => return Err(err.into()),
            },
            None => false,
        };
        if !routed && !registered {
            return Err(CoreError::NotFound {
                kind: "module".to_string(),
                id: module_id.to_string(),
            });
        }
        self.announce(EVENT_MODULE_UNREGISTERED, json!({ "moduleId": module_id }))
            .await;
        Ok(())
    }

    async fn announce(&self, event: &str, payload: serde_json::Value) {
        if let Err(err) = self.inner.bus.broadcast(event, payload).await {
            warn!(event, error = %err, "bus announcement failed");
        }
    }

    /// Snapshot; available before `initialize()`
    pub async fn get_status(&self) -> GatewayStatus {
        GatewayStatus {
            is_initialized: self.is_initialized(),
            queue_status: self.inner.queue.status().await.unwrap_or_default(),
            router_status: self.inner.router.status().await,
            metrics: self.inner.counters.snapshot(),
        }
    }

    /// Counters
    #[must_use]
    pub fn metrics(&self) -> GatewayMetrics {
        self.inner.counters.snapshot()
    }
}

impl std::fmt::Debug for ErrorInterfaceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorInterfaceGateway")
            .field("initialized", &self.is_initialized())
            .field("classifier", &self.inner.classifier.is_some())
            .field("registry", &self.inner.registry.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_classify::ClassifierConfig;
    use bulwark_core::{
        BusEnvelope, ChannelBus, ErrorInfo, ErrorSource, ErrorType, FnHandler, ModuleSource,
        ResponseCallback, ResponseStatus, Severity,
    };
    use bulwark_queue::QueueConfig;
    use std::sync::Mutex;

    fn ctx(id: &str, module_id: &str, message: &str) -> ErrorContext {
        ErrorContext::new(id, ErrorInfo::new(message, "Error"), ModuleSource::new(module_id, module_id, "1.0.0"))
    }

    fn default_handler() -> bulwark_core::SharedHandler {
        FnHandler::new("default", "Default", |ctx: ErrorContext| async move {
            Ok(ErrorResponse::success(&ctx, "handled by default"))
        })
        .shared()
    }

    async fn gateway_with(bus: Arc<dyn MessageBus>) -> (ErrorInterfaceGateway, Arc<ModuleRegistryManager>) {
        let classifier = Arc::new(ErrorClassifier::new(ClassifierConfig::default()));
        classifier.initialize().await.unwrap();
        let registry = Arc::new(ModuleRegistryManager::new());
        registry.initialize().await;
        let gateway = ErrorInterfaceGateway::builder(
            Arc::new(ErrorQueueManager::new(QueueConfig::default().with_flush_interval(0))),
            Arc::new(ResponseRouterEngine::new(default_handler())),
            Arc::new(ResponseExecutor::new()),
        )
        .classifier(classifier)
        .registry(Arc::clone(&registry))
        .bus(bus)
        .build();
        gateway.initialize().await;
        (gateway, registry)
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let gateway = ErrorInterfaceGateway::builder(
            Arc::new(ErrorQueueManager::default()),
            Arc::new(ResponseRouterEngine::new(default_handler())),
            Arc::new(ResponseExecutor::new()),
        )
        .build();
        let err = gateway.handle_error(ctx("e1", "m", "x")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotInitialized { .. }));
        assert!(gateway.handle_error_async(ctx("e1", "m", "x")).await.is_err());
        assert!(gateway.handle_batch_errors(vec![]).await.is_err());
        assert!(gateway
            .register_module(ModuleRegistration::new("m", "M", "1"))
            .await
            .is_err());
        assert!(!gateway.get_status().await.is_initialized);
    }

    #[tokio::test]
    async fn test_handle_error_classifies_and_records() {
        let (gateway, registry) = gateway_with(Arc::new(NoopBus)).await;
        gateway
            .register_module(ModuleRegistration::new("net", "Network", "1.0.0"))
            .await
            .unwrap();

        let response = gateway
            .handle_error(ctx("e1", "net", "Network connection timeout"))
            .await
            .unwrap();
        assert_eq!(response.result.status, ResponseStatus::Success);

        let status = gateway.get_status().await;
        assert_eq!(status.queue_status.size, 1);
        assert_eq!(status.queue_status.priority_counts.high, 1);
        assert_eq!(status.metrics.processed, 1);
        assert!((status.metrics.success_rate - 1.0).abs() < f64::EPSILON);

        let health = registry.get_module_health("net").await.unwrap();
        assert_eq!(health.success_count, 1);
    }

    #[tokio::test]
    async fn test_module_handler_failure_degrades() {
        let (gateway, registry) = gateway_with(Arc::new(NoopBus)).await;
        let failing = FnHandler::new("db", "Db", |_ctx: ErrorContext| async move {
            Err::<ErrorResponse, _>(CoreError::Internal {
                message: "pool exhausted".to_string(),
            })
        })
        .shared();
        gateway
            .register_module(ModuleRegistration::new("db", "Database", "1.0.0").with_handler(failing))
            .await
            .unwrap();

        let response = gateway.handle_error(ctx("e1", "db", "query failed")).await.unwrap();
        assert_eq!(response.result.code, CODE_PROCESSING_FAILED);
        assert_eq!(response.result.status, ResponseStatus::Failure);
        assert_eq!(response.data.metadata["originalError"]["message"], "query failed");
        assert_eq!(gateway.metrics().degraded, 1);
        assert_eq!(registry.get_module_health("db").await.unwrap().error_count, 1);
    }

    #[tokio::test]
    async fn test_async_delivers_once_through_both_paths() {
        let (gateway, _) = gateway_with(Arc::new(NoopBus)).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = ResponseCallback::new(move |response: ErrorResponse| {
            sink.lock().unwrap().push(response.error_id);
        });

        let pending = gateway
            .handle_error_async(ctx("e1", "m", "disk quota exhausted").with_callback(callback.clone()))
            .await
            .unwrap();
        assert_eq!(pending.error_id(), "e1");
        let response = pending.wait().await.unwrap();
        assert_eq!(response.error_id, "e1");

        assert_eq!(*seen.lock().unwrap(), vec!["e1".to_string()]);
        assert!(callback.is_consumed());
        assert!(!callback.invoke(response));
        assert_eq!(gateway.metrics().submitted_async, 1);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let (gateway, _) = gateway_with(Arc::new(NoopBus)).await;
        let responses = gateway
            .handle_batch_errors(vec![
                ctx("a", "m", "warning: minor"),
                ctx("b", "m", "fatal crash"),
                ctx("c", "m", "plain"),
            ])
            .await
            .unwrap();
        let ids: Vec<&str> = responses.iter().map(|r| r.error_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(gateway.metrics().batches, 1);
        assert_eq!(gateway.get_status().await.queue_status.priority_counts.critical, 1);
    }

    #[tokio::test]
    async fn test_batch_runs_in_order_and_isolates_failures() {
        let (gateway, _) = gateway_with(Arc::new(NoopBus)).await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&calls);
        let flaky = FnHandler::new("flaky", "Flaky", move |ctx: ErrorContext| {
            let log = Arc::clone(&log);
            async move {
                let nth = {
                    let mut seen = log.lock().unwrap();
                    seen.push(ctx.error_id.clone());
                    seen.len()
                };
                if nth == 2 {
                    return Err(CoreError::Internal {
                        message: "second call fails".to_string(),
                    });
                }
                Ok(ErrorResponse::success(&ctx, "handled"))
            }
        })
        .shared();
        gateway
            .register_module(ModuleRegistration::new("m", "Flaky", "1.0.0").with_handler(flaky))
            .await
            .unwrap();

        let responses = gateway
            .handle_batch_errors(vec![
                ctx("first", "m", "plain"),
                ctx("second", "m", "plain"),
                ctx("third", "m", "plain"),
            ])
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(responses[0].result.status, ResponseStatus::Success);
        assert_eq!(responses[1].result.code, CODE_PROCESSING_FAILED);
        assert_eq!(responses[1].error_id, "second");
        assert_eq!(responses[2].result.status, ResponseStatus::Success);
        assert_eq!(gateway.metrics().degraded, 1);
    }

    #[tokio::test]
    async fn test_blocking_modes_leave_callback_unfired() {
        let (gateway, _) = gateway_with(Arc::new(NoopBus)).await;
        let fired = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&fired);
        let callback = ResponseCallback::new(move |_response: ErrorResponse| {
            *counter.lock().unwrap() += 1;
        });

        let response = gateway
            .handle_error(ctx("e1", "m", "plain").with_callback(callback.clone()))
            .await
            .unwrap();
        gateway
            .handle_batch_errors(vec![ctx("e2", "m", "plain").with_callback(callback.clone())])
            .await
            .unwrap();

        assert_eq!(*fired.lock().unwrap(), 0);
        assert!(!callback.is_consumed());
        assert!(callback.invoke(response));
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_router_rejection_rolls_back_registry() {
        let router = Arc::new(ResponseRouterEngine::new(default_handler()));
        router
            .register_module(&ModuleRegistration::new("dup", "Taken", "1.0.0"))
            .await
            .unwrap();
        let registry = Arc::new(ModuleRegistryManager::new());
        registry.initialize().await;
        let gateway = ErrorInterfaceGateway::builder(
            Arc::new(ErrorQueueManager::new(QueueConfig::default().with_flush_interval(0))),
            router,
            Arc::new(ResponseExecutor::new()),
        )
        .registry(Arc::clone(&registry))
        .build();
        gateway.initialize().await;

        let err = gateway
            .register_module(ModuleRegistration::new("dup", "Again", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
        assert!(registry.get_module("dup").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_preclassified_context_is_kept() {
        let (gateway, _) = gateway_with(Arc::new(NoopBus)).await;
        let classification = bulwark_core::ErrorClassification::default()
            .with_source(ErrorSource::External)
            .with_type(ErrorType::Business)
            .with_severity(Severity::Low);
        let ctx = ctx("e1", "m", "Network connection timeout").with_classification(classification);
        gateway.handle_error(ctx).await.unwrap();
        assert_eq!(gateway.get_status().await.queue_status.priority_counts.low, 1);
    }

    #[tokio::test]
    async fn test_module_lifecycle_is_announced() {
        let bus = ChannelBus::new(16);
        let mut events = bus.subscribe();
        let (gateway, registry) = gateway_with(Arc::new(bus)).await;

        gateway
            .register_module(ModuleRegistration::new("auth", "Auth", "2.0.0"))
            .await
            .unwrap();
        assert!(gateway
            .register_module(ModuleRegistration::new("auth", "Auth", "2.0.0"))
            .await
            .is_err());
        gateway.unregister_module("auth").await.unwrap();
        assert!(gateway.unregister_module("auth").await.is_err());
        assert_eq!(registry.module_count().await, 0);

        match events.recv().await.unwrap() {
            BusEnvelope::Broadcast { event, payload } => {
                assert_eq!(event, EVENT_MODULE_REGISTERED);
                assert_eq!(payload["version"], "2.0.0");
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
        match events.recv().await.unwrap() {
            BusEnvelope::Broadcast { event, .. } => assert_eq!(event, EVENT_MODULE_UNREGISTERED),
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let (gateway, _) = gateway_with(Arc::new(NoopBus)).await;
        gateway.handle_error(ctx("e1", "m", "x")).await.unwrap();
        let drained = gateway.shutdown().await;
        assert_eq!(drained.len(), 1);
        assert!(gateway.shutdown().await.is_empty());
        assert!(gateway.handle_error(ctx("e2", "m", "x")).await.is_err());
    }
}

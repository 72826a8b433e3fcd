//! Error handling center.
//!
//! Owns one instance of every component, wires them into a gateway and runs
//! their lifecycles in dependency order.

use crate::executor::ResponseExecutor;
use crate::gateway::ErrorInterfaceGateway;
use crate::handlers::TemplateResponseHandler;
use crate::router::ResponseRouterEngine;
use bulwark_classify::{ClassifierConfig, ErrorClassifier};
use bulwark_core::{
    CoreResult, ErrorResponse, MessageBus, NoopBus, Severity, SharedClock, SharedHandler, SystemClock,
};
use bulwark_policy::{
    CircuitBreakerConfig, ErrorPolicy, NotificationConfig, PolicyConfig, PolicyEngine,
    PolicyEngineConfig, RetryConfig,
};
use bulwark_queue::{ErrorQueueManager, QueueConfig};
use bulwark_registry::ModuleRegistryManager;
use bulwark_template::{ResponseTemplateManager, TemplateManagerConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Id of the built-in retry policy
pub const DEFAULT_RETRY_POLICY: &str = "default.retry";
/// Id of the built-in isolation policy
pub const DEFAULT_ISOLATION_POLICY: &str = "default.isolation";
/// Id of the built-in notification policy
pub const DEFAULT_NOTIFICATION_POLICY: &str = "default.notification";

/// Center configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CenterConfig {
    /// Queue
    pub queue: QueueConfig,
    /// Classifier
    pub classifier: ClassifierConfig,
    /// Policy engine
    pub policy: PolicyEngineConfig,
    /// Template manager
    pub templates: TemplateManagerConfig,
    /// Install the built-in policies when none are registered
    pub default_policies: bool,
    /// Built-in retry policy
    pub retry: RetryConfig,
    /// Built-in isolation policy
    pub circuit_breaker: CircuitBreakerConfig,
    /// Channels of the built-in notification policy; empty disables it
    pub notification_channels: Vec<String>,
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            classifier: ClassifierConfig::default(),
            policy: PolicyEngineConfig::default(),
            templates: TemplateManagerConfig::default(),
            default_policies: true,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            notification_channels: vec!["log".to_string()],
        }
    }
}

impl CenterConfig {
    /// Set queue configuration
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set classifier configuration
    #[must_use]
    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set policy engine configuration
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyEngineConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Set template manager configuration
    #[must_use]
    pub fn with_templates(mut self, templates: TemplateManagerConfig) -> Self {
        self.templates = templates;
        self
    }

    /// Enable or disable the built-in policies
    #[must_use]
    pub fn with_default_policies(mut self, enabled: bool) -> Self {
        self.default_policies = enabled;
        self
    }

    /// Set the built-in retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the built-in isolation policy
    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Set notification channels
    #[must_use]
    pub fn with_notification_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.notification_channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Config with every background task disabled
    #[must_use]
    pub fn quiet() -> Self {
        let defaults = Self::default();
        Self {
            queue: defaults.queue.clone().with_flush_interval(0),
            policy: defaults.policy.clone().with_cleanup_interval(0),
            templates: defaults.templates.clone().with_cache_sweep_interval(0),
            ..defaults
        }
    }

    fn builtin_policies(&self) -> Vec<ErrorPolicy> {
        let mut policies = vec![
            ErrorPolicy::new(DEFAULT_RETRY_POLICY, "Retry transient failures", PolicyConfig::Retry(self.retry.clone()))
                .with_priority(30),
            ErrorPolicy::new(
                DEFAULT_ISOLATION_POLICY,
                "Isolate failing modules",
                PolicyConfig::Isolation(self.circuit_breaker),
            )
            .with_priority(20),
        ];
        if !self.notification_channels.is_empty() {
            policies.push(
                ErrorPolicy::new(
                    DEFAULT_NOTIFICATION_POLICY,
                    "Notify on severe errors",
                    PolicyConfig::Notification(NotificationConfig {
                        channels: self.notification_channels.clone(),
                        severities: vec![Severity::High, Severity::Critical],
                    }),
                )
                .with_priority(10),
            );
        }
        policies
    }
}

/// All components wired together
#[derive(Debug)]
pub struct ErrorHandlingCenter {
    config: CenterConfig,
    classifier: Arc<ErrorClassifier>,
    registry: Arc<ModuleRegistryManager>,
    policies: Arc<PolicyEngine>,
    templates: Arc<ResponseTemplateManager>,
    router: Arc<ResponseRouterEngine>,
    gateway: ErrorInterfaceGateway,
}

impl ErrorHandlingCenter {
    /// Center on the system clock with no bus
    #[must_use]
    pub fn new(config: CenterConfig) -> Self {
        Self::with_parts(config, SystemClock::shared(), Arc::new(NoopBus))
    }

    /// Center on an explicit clock and bus
    #[must_use]
    pub fn with_parts(config: CenterConfig, clock: SharedClock, bus: Arc<dyn MessageBus>) -> Self {
        let classifier = Arc::new(ErrorClassifier::new(config.classifier.clone()));
        let registry = Arc::new(ModuleRegistryManager::with_clock(Arc::clone(&clock)));
        let policies = Arc::new(PolicyEngine::with_clock(config.policy.clone(), Arc::clone(&clock)));
        let templates = Arc::new(ResponseTemplateManager::with_clock(config.templates.clone(), clock));
        let default_handler: SharedHandler = Arc::new(TemplateResponseHandler::new(Arc::clone(&templates)));
        let router = Arc::new(ResponseRouterEngine::new(default_handler));
        let gateway = ErrorInterfaceGateway::builder(
            Arc::new(ErrorQueueManager::new(config.queue.clone())),
            Arc::clone(&router),
            Arc::new(ResponseExecutor::with_policies(Arc::clone(&policies))),
        )
        .classifier(Arc::clone(&classifier))
        .registry(Arc::clone(&registry))
        .bus(bus)
        .build();

        Self {
            config,
            classifier,
            registry,
            policies,
            templates,
            router,
            gateway,
        }
    }

    /// Initialize every component, leaves first. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if a built-in rule, template or policy is rejected
    pub async fn initialize(&self) -> CoreResult<()> {
        self.classifier.initialize().await?;
        self.registry.initialize().await;
        self.policies.initialize().await;
        self.templates.initialize().await?;
        if self.config.default_policies && self.policies.list_policies().await.is_empty() {
            for policy in self.config.builtin_policies() {
                self.policies.register_policy(policy).await?;
            }
        }
        self.gateway.initialize().await;
        info!(
            default_policies = self.config.default_policies,
            "error handling center initialized"
        );
        Ok(())
    }

    /// Shut every component down in reverse order.
    ///
    /// Returns the hand-off responses of errors still queued.
    pub async fn shutdown(&self) -> Vec<ErrorResponse> {
        let drained = self.gateway.shutdown().await;
        self.templates.shutdown().await;
        self.policies.shutdown().await;
        self.registry.shutdown().await;
        self.classifier.shutdown().await;
        info!(drained = drained.len(), "error handling center shut down");
        drained
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &CenterConfig {
        &self.config
    }

    /// The gateway errors are reported to
    #[must_use]
    pub fn gateway(&self) -> &ErrorInterfaceGateway {
        &self.gateway
    }

    /// Classifier
    #[must_use]
    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// Module registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ModuleRegistryManager> {
        &self.registry
    }

    /// Policy engine
    #[must_use]
    pub fn policies(&self) -> &Arc<PolicyEngine> {
        &self.policies
    }

    /// Template manager
    #[must_use]
    pub fn templates(&self) -> &Arc<ResponseTemplateManager> {
        &self.templates
    }

    /// Router
    #[must_use]
    pub fn router(&self) -> &Arc<ResponseRouterEngine> {
        &self.router
    }
}

impl Default for ErrorHandlingCenter {
    fn default() -> Self {
        Self::new(CenterConfig::default())
    }
}

//! Policy engine: applies registered policies to responses and owns the
//! circuit-breaker and retry state they consult.

use crate::circuit::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
use crate::error::{PolicyError, PolicyResult};
use crate::policy::{ErrorPolicy, FallbackConfig, NotificationConfig, PolicyConfig};
use crate::retry::{RetryConfig, RetryDecision, RetryState};
use bulwark_core::response::{
    CODE_CIRCUIT_BREAKER_OPEN, CODE_FALLBACK_ACTIVATED, CODE_RETRY_SCHEDULED,
};
use bulwark_core::{
    Action, ActionType, Annotation, ErrorContext, ErrorResponse, ResponseStatus, SharedClock,
    SystemClock,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Policy engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEngineConfig {
    /// Interval of the stale-state reaper, in milliseconds (0 disables it)
    pub cleanup_interval_ms: u64,
    /// Age after which retry state is dropped, in milliseconds
    pub retry_state_ttl_ms: u64,
    /// Idle time after which a closed breaker is dropped, in milliseconds
    pub breaker_idle_ttl_ms: u64,
}

impl Default for PolicyEngineConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: 300_000,
            retry_state_ttl_ms: 3_600_000,
            breaker_idle_ttl_ms: 3_600_000,
        }
    }
}

impl PolicyEngineConfig {
    /// Set reaper interval
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval_ms: u64) -> Self {
        self.cleanup_interval_ms = interval_ms;
        self
    }

    /// Set retry state TTL
    #[must_use]
    pub fn with_retry_state_ttl(mut self, ttl_ms: u64) -> Self {
        self.retry_state_ttl_ms = ttl_ms;
        self
    }

    /// Set breaker idle TTL
    #[must_use]
    pub fn with_breaker_idle_ttl(mut self, ttl_ms: u64) -> Self {
        self.breaker_idle_ttl_ms = ttl_ms;
        self
    }
}

/// What a cleanup pass removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Retry states dropped
    pub retry_states: usize,
    /// Breakers dropped
    pub breakers: usize,
}

#[derive(Debug)]
struct EngineInner {
    config: PolicyEngineConfig,
    clock: SharedClock,
    initialized: AtomicBool,
    policies: RwLock<IndexMap<String, ErrorPolicy>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    retries: Mutex<HashMap<String, RetryState>>,
}

impl EngineInner {
    async fn cleanup(&self) -> CleanupReport {
        let now = self.clock.now_millis();
        let mut report = CleanupReport::default();
        {
            let mut retries = self.retries.lock().await;
            let before = retries.len();
            retries.retain(|_, state| !state.is_stale(now, self.config.retry_state_ttl_ms));
            report.retry_states = before - retries.len();
        }
        {
            let mut breakers = self.breakers.lock().await;
            let before = breakers.len();
            let ttl = self.config.breaker_idle_ttl_ms;
            breakers.retain(|_, breaker| {
                let idle = breaker
                    .last_attempt_time
                    .is_none_or(|t| now.saturating_sub(t) > ttl);
                !(breaker.state == BreakerState::Closed && idle)
            });
            report.breakers = before - breakers.len();
        }
        if report.retry_states + report.breakers > 0 {
            debug!(
                retry_states = report.retry_states,
                breakers = report.breakers,
                "stale policy state reaped"
            );
        }
        report
    }
}

/// Applies resilience policies to error responses
#[derive(Debug)]
pub struct PolicyEngine {
    inner: Arc<EngineInner>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl PolicyEngine {
    /// Create an uninitialized engine on the system clock
    #[must_use]
    pub fn new(config: PolicyEngineConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create an uninitialized engine on `clock`
    #[must_use]
    pub fn with_clock(config: PolicyEngineConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                clock,
                initialized: AtomicBool::new(false),
                policies: RwLock::new(IndexMap::new()),
                breakers: Mutex::new(HashMap::new()),
                retries: Mutex::new(HashMap::new()),
            }),
            reaper: Mutex::new(None),
        }
    }

    /// Start the engine and its reaper. Idempotent.
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            return;
        }
        let interval_ms = self.inner.config.cleanup_interval_ms;
        if interval_ms > 0 {
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    inner.cleanup().await;
                }
            });
            *self.reaper.lock().await = Some(handle);
        }
        info!(cleanup_interval_ms = interval_ms, "policy engine initialized");
    }

    /// Stop the reaper and drop all policies and state. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().await.take() {
            handle.abort();
        }
        if !self.inner.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.policies.write().await.clear();
        self.inner.breakers.lock().await.clear();
        self.inner.retries.lock().await.clear();
        info!("policy engine shut down");
    }

    /// Whether `initialize()` has run
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> PolicyResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(PolicyError::NotInitialized)
        }
    }

    /// Register a policy
    ///
    /// # Errors
    ///
    /// Returns error if the policy is invalid or its id is taken
    pub async fn register_policy(&self, policy: ErrorPolicy) -> PolicyResult<()> {
        policy.validate()?;
        let mut policies = self.inner.policies.write().await;
        if policies.contains_key(&policy.policy_id) {
            return Err(PolicyError::DuplicatePolicy {
                policy_id: policy.policy_id,
            });
        }
        info!(
            policy_id = %policy.policy_id,
            kind = policy.config.kind(),
            priority = policy.priority,
            "policy registered"
        );
        policies.insert(policy.policy_id.clone(), policy);
        Ok(())
    }

    /// Remove a policy
    ///
    /// # Errors
    ///
    /// Returns error if no such policy exists
    pub async fn unregister_policy(&self, policy_id: &str) -> PolicyResult<ErrorPolicy> {
        self.inner
            .policies
            .write()
            .await
            .shift_remove(policy_id)
            .ok_or_else(|| PolicyError::PolicyNotFound {
                policy_id: policy_id.to_string(),
            })
    }

    /// Enable or disable a policy
    ///
    /// # Errors
    ///
    /// Returns error if no such policy exists
    pub async fn set_policy_enabled(&self, policy_id: &str, enabled: bool) -> PolicyResult<()> {
        let mut policies = self.inner.policies.write().await;
        let policy = policies
            .get_mut(policy_id)
            .ok_or_else(|| PolicyError::PolicyNotFound {
                policy_id: policy_id.to_string(),
            })?;
        policy.enabled = enabled;
        Ok(())
    }

    /// Registered policies in registration order
    pub async fn list_policies(&self) -> Vec<ErrorPolicy> {
        self.inner.policies.read().await.values().cloned().collect()
    }

    /// Apply every enabled, matching policy in descending priority order.
    ///
    /// A policy that fails to apply is logged and skipped; the response keeps
    /// whatever the previous policies produced.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NotInitialized`] before `initialize()`
    pub async fn execute_policies(&self, ctx: &ErrorContext, response: ErrorResponse) -> PolicyResult<ErrorResponse> {
        self.ensure_initialized()?;

        let mut applicable: Vec<ErrorPolicy> = self
            .inner
            .policies
            .read()
            .await
            .values()
            .filter(|p| p.enabled && p.matches(ctx, &response))
            .cloned()
            .collect();
        // stable: equal priorities keep registration order
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut response = response;
        for policy in &applicable {
            let mut candidate = response.clone();
            match self.apply(policy, ctx, &mut candidate).await {
                Ok(()) => {
                    candidate.push_annotation(
                        Annotation::new(
                            "policy",
                            json!({ "policyId": policy.policy_id, "type": policy.config.kind() }),
                        )
                        .with_timestamp(self.inner.clock.now_millis()),
                    );
                    response = candidate;
                }
                Err(err) => {
                    warn!(
                        policy_id = %policy.policy_id,
                        error_id = %ctx.error_id,
                        error = %err,
                        "policy failed, skipping"
                    );
                }
            }
        }
        Ok(response)
    }

    async fn apply(&self, policy: &ErrorPolicy, ctx: &ErrorContext, response: &mut ErrorResponse) -> PolicyResult<()> {
        match &policy.config {
            PolicyConfig::Retry(config) => self.apply_retry(config, ctx, response).await,
            PolicyConfig::Fallback(config) => {
                self.apply_fallback(config, ctx, response);
                Ok(())
            }
            PolicyConfig::Isolation(config) => self.apply_isolation(*config, ctx, response).await,
            PolicyConfig::Notification(config) => {
                self.apply_notification(config, ctx, response);
                Ok(())
            }
            PolicyConfig::Custom(config) => {
                let context = serde_json::to_value(ctx).map_err(|e| PolicyError::ApplyFailed {
                    policy_id: policy.policy_id.clone(),
                    message: e.to_string(),
                })?;
                response.push_action(self.action(
                    ActionType::Custom,
                    &ctx.source.module_id,
                    json!({ "policyId": policy.policy_id, "config": config, "context": context }),
                ));
                Ok(())
            }
        }
    }

    async fn apply_retry(&self, config: &RetryConfig, ctx: &ErrorContext, response: &mut ErrorResponse) -> PolicyResult<()> {
        if !config.is_retryable(&response.result.code) {
            return Ok(());
        }
        match self.next_retry(&ctx.error_id, config).await {
            RetryDecision::Retry { attempt, delay_ms } => {
                response.push_action(self.action(
                    ActionType::Retry,
                    &ctx.source.module_id,
                    json!({
                        "errorId": ctx.error_id,
                        "attempt": attempt,
                        "delay": delay_ms,
                        "maxRetries": config.max_retries,
                    }),
                ));
                response.set_outcome(ResponseStatus::Retry, CODE_RETRY_SCHEDULED);
            }
            RetryDecision::Exhausted { attempts } => {
                response.push_annotation(
                    Annotation::new("retry_exhausted", json!({ "attempts": attempts }))
                        .with_timestamp(self.inner.clock.now_millis()),
                );
            }
        }
        Ok(())
    }

    fn apply_fallback(&self, config: &FallbackConfig, ctx: &ErrorContext, response: &mut ErrorResponse) {
        if !config.enabled {
            return;
        }
        response.data.response = config.response.clone();
        if let Some(message) = &config.message {
            response.result.message = message.clone();
        }
        response.set_outcome(ResponseStatus::Fallback, CODE_FALLBACK_ACTIVATED);
        response.push_action(self.action(
            ActionType::Fallback,
            &ctx.source.module_id,
            json!({ "errorId": ctx.error_id }),
        ));
    }

    async fn apply_isolation(&self, config: CircuitBreakerConfig, ctx: &ErrorContext, response: &mut ErrorResponse) -> PolicyResult<()> {
        let module_id = &ctx.source.module_id;
        let state = self.update_circuit_breaker(module_id, false, config).await;
        if self.is_circuit_breaker_allow(module_id).await {
            return Ok(());
        }
        response.push_action(
            self.action(
                ActionType::Isolate,
                module_id,
                json!({ "state": state, "recoveryTime": config.recovery_time_ms }),
            )
            .with_priority(100),
        );
        response.set_outcome(ResponseStatus::Failure, CODE_CIRCUIT_BREAKER_OPEN);
        Ok(())
    }

    fn apply_notification(&self, config: &NotificationConfig, ctx: &ErrorContext, response: &mut ErrorResponse) {
        let severity = ctx.classification_or_default().severity;
        if !config.covers(severity) {
            return;
        }
        for channel in &config.channels {
            response.push_action(self.action(
                ActionType::Notify,
                channel,
                json!({
                    "errorId": ctx.error_id,
                    "moduleId": ctx.source.module_id,
                    "severity": severity,
                    "message": ctx.error.message,
                }),
            ));
        }
    }

    fn action(&self, action_type: ActionType, target: &str, payload: Value) -> Action {
        Action::new(action_type, target, payload).with_timestamp(self.inner.clock.now_millis())
    }

    /// Record an outcome on a module's breaker, creating it if needed
    pub async fn update_circuit_breaker(&self, module_id: &str, success: bool, config: CircuitBreakerConfig) -> BreakerState {
        let now = self.inner.clock.now_millis();
        let mut breakers = self.inner.breakers.lock().await;
        let breaker = breakers
            .entry(module_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(config));
        let (before, after) = breaker.record(success, config, now);
        if before != after {
            info!(
                module_id,
                from = %before,
                to = %after,
                failures = breaker.failure_count,
                "circuit breaker transition"
            );
        }
        after
    }

    /// Whether calls to a module may proceed (no breaker means yes)
    pub async fn is_circuit_breaker_allow(&self, module_id: &str) -> bool {
        let now = self.inner.clock.now_millis();
        let mut breakers = self.inner.breakers.lock().await;
        breakers.get_mut(module_id).is_none_or(|b| b.allows(now))
    }

    /// Snapshot of a module's breaker
    pub async fn circuit_breaker_state(&self, module_id: &str) -> Option<CircuitBreaker> {
        let now = self.inner.clock.now_millis();
        let mut breakers = self.inner.breakers.lock().await;
        breakers.get_mut(module_id).map(|b| {
            b.refresh(now);
            b.clone()
        })
    }

    /// Grant or refuse the next retry for an error
    pub async fn next_retry(&self, error_id: &str, config: &RetryConfig) -> RetryDecision {
        let now = self.inner.clock.now_millis();
        let mut retries = self.inner.retries.lock().await;
        let state = retries
            .entry(error_id.to_string())
            .or_insert_with(|| RetryState::new(config, now));
        let decision = state.advance(config);
        debug!(error_id, ?decision, "retry decision");
        decision
    }

    /// Retry state for an error
    pub async fn retry_state(&self, error_id: &str) -> Option<RetryState> {
        self.inner.retries.lock().await.get(error_id).copied()
    }

    /// Forget retry state for an error
    pub async fn reset_retry(&self, error_id: &str) -> bool {
        self.inner.retries.lock().await.remove(error_id).is_some()
    }

    /// Drop stale retry state and idle closed breakers
    pub async fn cleanup_stale_state(&self) -> CleanupReport {
        self.inner.cleanup().await
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(PolicyEngineConfig::default())
    }
}

//! Template registry, selection and response generation.

use crate::cache::{CacheStats, ResponseCache};
use crate::error::{TemplateError, TemplateResult};
use crate::render::{data_context, render_str, render_value, set_path};
use crate::template::{builtin_templates, ResponseTemplate};
use bulwark_core::{
    Annotation, ErrorClassification, ErrorContext, ErrorResponse, IdPrefix, ResponseResult,
    SharedClock, SystemClock,
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

/// Id of the template used when nothing more specific matches
pub const DEFAULT_TEMPLATE_ID: &str = "default";

/// Template manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateManagerConfig {
    /// Interval of the expired-entry sweeper, in milliseconds (0 disables it)
    pub cache_sweep_interval_ms: u64,
    /// Install the built-in templates on `initialize()`
    pub builtin_templates: bool,
}

impl Default for TemplateManagerConfig {
    fn default() -> Self {
        Self {
            cache_sweep_interval_ms: 60_000,
            builtin_templates: true,
        }
    }
}

impl TemplateManagerConfig {
    /// Set sweeper interval
    #[must_use]
    pub fn with_cache_sweep_interval(mut self, interval_ms: u64) -> Self {
        self.cache_sweep_interval_ms = interval_ms;
        self
    }

    /// Toggle built-in templates
    #[must_use]
    pub fn with_builtin_templates(mut self, enabled: bool) -> Self {
        self.builtin_templates = enabled;
        self
    }
}

#[derive(Debug)]
struct ManagerInner {
    config: TemplateManagerConfig,
    clock: SharedClock,
    initialized: AtomicBool,
    templates: RwLock<IndexMap<String, ResponseTemplate>>,
    assignments: RwLock<HashMap<String, String>>,
    cache: Mutex<ResponseCache>,
}

/// Registry of response templates
#[derive(Debug)]
pub struct ResponseTemplateManager {
    inner: Arc<ManagerInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseTemplateManager {
    /// Create an uninitialized manager on the system clock
    #[must_use]
    pub fn new(config: TemplateManagerConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create an uninitialized manager on `clock`
    #[must_use]
    pub fn with_clock(config: TemplateManagerConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                clock,
                initialized: AtomicBool::new(false),
                templates: RwLock::new(IndexMap::new()),
                assignments: RwLock::new(HashMap::new()),
                cache: Mutex::new(ResponseCache::new()),
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Install built-in templates and start the sweeper. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if a built-in template fails validation
    pub async fn initialize(&self) -> TemplateResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if self.inner.config.builtin_templates {
            let mut templates = self.inner.templates.write().await;
            for template in builtin_templates() {
                template.validate()?;
                if !templates.contains_key(&template.template_id) {
                    templates.insert(template.template_id.clone(), template);
                }
            }
        }

        let interval_ms = self.inner.config.cache_sweep_interval_ms;
        if interval_ms > 0 {
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let now = inner.clock.now_millis();
                    let dropped = inner.cache.lock().await.sweep(now);
                    if dropped > 0 {
                        debug!(dropped, "expired template responses swept");
                    }
                }
            });
            *self.sweeper.lock().await = Some(handle);
        }

        self.inner.initialized.store(true, Ordering::Release);
        info!(
            templates = self.inner.templates.read().await.len(),
            "response template manager initialized"
        );
        Ok(())
    }

    /// Stop the sweeper and drop templates, assignments and cache. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
        if !self.inner.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.templates.write().await.clear();
        self.inner.assignments.write().await.clear();
        self.inner.cache.lock().await.clear();
        info!("response template manager shut down");
    }

    /// Whether `initialize()` has run
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> TemplateResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(TemplateError::NotInitialized)
        }
    }

    /// Register a template, replacing any template with the same id.
    ///
    /// Responses cached from a replaced template are dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the template is invalid
    pub async fn register_template(&self, template: ResponseTemplate) -> TemplateResult<()> {
        template.validate()?;
        let id = template.template_id.clone();
        let replaced = self
            .inner
            .templates
            .write()
            .await
            .insert(id.clone(), template)
            .is_some();
        if replaced {
            self.inner.cache.lock().await.invalidate_template(&id);
        }
        info!(template_id = %id, replaced, "template registered");
        Ok(())
    }

    /// Remove a template along with its assignments and cached responses
    ///
    /// # Errors
    ///
    /// Returns error if no such template exists
    pub async fn unregister_template(&self, template_id: &str) -> TemplateResult<ResponseTemplate> {
        let removed = self
            .inner
            .templates
            .write()
            .await
            .shift_remove(template_id)
            .ok_or_else(|| TemplateError::not_found(template_id))?;
        self.inner
            .assignments
            .write()
            .await
            .retain(|_, assigned| assigned != template_id);
        self.inner.cache.lock().await.invalidate_template(template_id);
        info!(template_id, "template unregistered");
        Ok(removed)
    }

    /// Prefer `template_id` for errors reported by `module_id`
    ///
    /// # Errors
    ///
    /// Returns error if no such template exists
    pub async fn assign_template_to_module(&self, module_id: &str, template_id: &str) -> TemplateResult<()> {
        if !self.inner.templates.read().await.contains_key(template_id) {
            return Err(TemplateError::not_found(template_id));
        }
        self.inner
            .assignments
            .write()
            .await
            .insert(module_id.to_string(), template_id.to_string());
        debug!(module_id, template_id, "template assigned to module");
        Ok(())
    }

    /// Template by id
    pub async fn get_template(&self, template_id: &str) -> Option<ResponseTemplate> {
        self.inner.templates.read().await.get(template_id).cloned()
    }

    /// Registered templates in registration order
    pub async fn list_templates(&self) -> Vec<ResponseTemplate> {
        self.inner.templates.read().await.values().cloned().collect()
    }

    /// Select the template for an error.
    ///
    /// Tries the module's assigned template, then `<type>_<severity>`,
    /// `<type>` and `<severity>`; each candidate must exist and match. Falls
    /// back to `default`.
    ///
    /// # Errors
    ///
    /// Returns error if not initialized or no candidate nor `default` exists
    pub async fn get_template_for_error(&self, ctx: &ErrorContext) -> TemplateResult<ResponseTemplate> {
        self.ensure_initialized()?;
        let classification = ctx.classification_or_default();
        let error_type = classification.error_type.as_str();
        let severity = classification.severity.as_str();

        let assigned = self
            .inner
            .assignments
            .read()
            .await
            .get(&ctx.source.module_id)
            .cloned();
        let candidates = assigned.into_iter().chain([
            format!("{}_{}", error_type, severity),
            error_type.to_string(),
            severity.to_string(),
        ]);

        let templates = self.inner.templates.read().await;
        for id in candidates {
            if let Some(template) = templates.get(&id) {
                if template.matches(ctx, &classification) {
                    return Ok(template.clone());
                }
            }
        }
        templates
            .get(DEFAULT_TEMPLATE_ID)
            .cloned()
            .ok_or_else(|| TemplateError::not_found(DEFAULT_TEMPLATE_ID))
    }

    /// Render a template into a response for `ctx`.
    ///
    /// Cacheable templates return the memoized response for the same error id
    /// until the template's timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns error if not initialized or the rendered result block is not
    /// a valid result
    pub async fn generate_response(&self, template: &ResponseTemplate, ctx: &ErrorContext) -> TemplateResult<ErrorResponse> {
        self.ensure_initialized()?;
        if template.cacheable {
            let now = self.inner.clock.now_millis();
            if let Some(hit) = self
                .inner
                .cache
                .lock()
                .await
                .get(&template.template_id, &ctx.error_id, now)
            {
                return Ok(hit);
            }
        }

        let response = self.render(template, ctx)?;

        if template.cacheable {
            let now = self.inner.clock.now_millis();
            self.inner.cache.lock().await.insert(
                &template.template_id,
                &ctx.error_id,
                response.clone(),
                now,
                template.cache_timeout_ms,
            );
        }
        Ok(response)
    }

    /// Select and render in one step
    ///
    /// # Errors
    ///
    /// Returns error if selection or rendering fails
    pub async fn respond(&self, ctx: &ErrorContext) -> TemplateResult<ErrorResponse> {
        let template = self.get_template_for_error(ctx).await?;
        self.generate_response(&template, ctx).await
    }

    fn render(&self, template: &ResponseTemplate, ctx: &ErrorContext) -> TemplateResult<ErrorResponse> {
        let classification: ErrorClassification = ctx.classification_or_default();
        let data = data_context(ctx, &classification);

        let mut output = json!({
            "result": {
                "status": template.result.status,
                "code": render_str(&template.result.code, &data),
                "message": render_str(&template.result.message, &data),
                "details": render_value(&template.result.details, &data),
            },
            "data": render_value(&template.data, &data),
        });

        for (path, f) in &template.dynamic_content {
            match f(&data) {
                Ok(value) => {
                    if !set_path(&mut output, path, value) {
                        warn!(template_id = %template.template_id, path = %path, "dynamic content path not writable");
                    }
                }
                Err(err) => {
                    warn!(template_id = %template.template_id, path = %path, error = %err, "dynamic content failed");
                }
            }
        }

        let render_err = |message: String| TemplateError::Render {
            template_id: template.template_id.clone(),
            message,
        };
        let result_block = output
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null);
        let result: ResponseResult =
            serde_json::from_value(result_block).map_err(|e| render_err(e.to_string()))?;

        let mut response = ErrorResponse::new(ctx, IdPrefix::Template, result);
        response.data.response = output.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        response
            .data
            .metadata
            .insert("templateId".to_string(), Value::String(template.template_id.clone()));
        response.push_annotation(
            Annotation::new(
                "template",
                json!({ "templateId": template.template_id, "category": template.category }),
            )
            .with_timestamp(self.inner.clock.now_millis()),
        );
        Ok(response)
    }

    /// Drop every cached response; returns how many were dropped
    pub async fn refresh_template_cache(&self) -> usize {
        let dropped = self.inner.cache.lock().await.clear();
        info!(dropped, "template cache refreshed");
        dropped
    }

    /// Drop cached responses of one template
    pub async fn invalidate_template_cache(&self, template_id: &str) -> usize {
        self.inner.cache.lock().await.invalidate_template(template_id)
    }

    /// Cache counters
    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.lock().await.stats()
    }
}

impl Default for ResponseTemplateManager {
    fn default() -> Self {
        Self::new(TemplateManagerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateResultBlock;
    use bulwark_core::{
        Condition, ErrorInfo, ErrorType, ManualClock, ModuleSource, ResponseStatus, Severity,
    };

    fn ctx(error_id: &str, error_type: ErrorType, severity: Severity) -> ErrorContext {
        ErrorContext::new(
            error_id,
            ErrorInfo::new("Network connection timeout", "TimeoutError"),
            ModuleSource::new("gateway", "API Gateway", "3.1.0"),
        )
        .with_classification(
            ErrorClassification::default()
                .with_type(error_type)
                .with_severity(severity),
        )
    }

    async fn manager() -> (ResponseTemplateManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(50_000));
        let manager = ResponseTemplateManager::with_clock(
            TemplateManagerConfig::default().with_cache_sweep_interval(0),
            clock.clone(),
        );
        manager.initialize().await.unwrap();
        (manager, clock)
    }

    fn simple(id: &str) -> ResponseTemplate {
        ResponseTemplate::new(id, id, TemplateResultBlock::new(ResponseStatus::Failure, "X", "{{error.message}}"))
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let manager = ResponseTemplateManager::default();
        let ctx = ctx("e", ErrorType::Technical, Severity::Low);
        assert_eq!(
            manager.get_template_for_error(&ctx).await.unwrap_err(),
            TemplateError::NotInitialized
        );
    }

    #[tokio::test]
    async fn test_selection_order() {
        let (manager, _) = manager().await;
        let network_high = ctx("e", ErrorType::Network, Severity::High);
        assert_eq!(manager.get_template_for_error(&network_high).await.unwrap().template_id, "network");

        let critical = ctx("e", ErrorType::Technical, Severity::Critical);
        assert_eq!(manager.get_template_for_error(&critical).await.unwrap().template_id, "critical");

        let plain = ctx("e", ErrorType::Business, Severity::Low);
        assert_eq!(manager.get_template_for_error(&plain).await.unwrap().template_id, "default");

        manager.register_template(simple("network_high")).await.unwrap();
        assert_eq!(
            manager.get_template_for_error(&network_high).await.unwrap().template_id,
            "network_high"
        );

        manager.register_template(simple("gateway_special")).await.unwrap();
        manager.assign_template_to_module("gateway", "gateway_special").await.unwrap();
        assert_eq!(
            manager.get_template_for_error(&network_high).await.unwrap().template_id,
            "gateway_special"
        );
    }

    #[tokio::test]
    async fn test_assigned_template_must_match() {
        let (manager, _) = manager().await;
        manager
            .register_template(simple("only_critical").with_condition(Condition::equals("severity", "critical")))
            .await
            .unwrap();
        manager.assign_template_to_module("gateway", "only_critical").await.unwrap();

        let high = ctx("e", ErrorType::Network, Severity::High);
        assert_eq!(manager.get_template_for_error(&high).await.unwrap().template_id, "network");

        assert!(manager.assign_template_to_module("gateway", "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_generate_substitutes_message() {
        let (manager, _) = manager().await;
        let ctx = ctx("e1", ErrorType::Network, Severity::High);
        let response = manager.respond(&ctx).await.unwrap();
        assert!(response.response_id.starts_with("tmpl_"));
        assert_eq!(response.result.code, "NETWORK_ERROR");
        assert!(response.result.message.contains("Network connection timeout"));
        assert!(response.result.message.contains("API Gateway"));
        assert_eq!(response.data.response["moduleId"], "gateway");
        assert_eq!(response.data.metadata["templateId"], "network");
    }

    #[tokio::test]
    async fn test_dynamic_content_failure_is_isolated() {
        let (manager, _) = manager().await;
        let template = simple("dyn")
            .with_data(json!({ "hint": "static" }))
            .with_dynamic("data.hint", |_| Err("lookup failed".to_string()))
            .with_dynamic("data.length", |data| {
                Ok(json!(data["error"]["message"].as_str().map_or(0, str::len)))
            })
            .with_dynamic("result.message", |data| {
                Ok(json!(format!("[{}] overridden", data["module"]["id"].as_str().unwrap_or("?"))))
            });
        let ctx = ctx("e1", ErrorType::Technical, Severity::Low);
        let response = manager.generate_response(&template, &ctx).await.unwrap();
        assert_eq!(response.data.response["hint"], "static");
        assert_eq!(response.data.response["length"], 26);
        assert_eq!(response.result.message, "[gateway] overridden");
    }

    #[tokio::test]
    async fn test_cache_ttl() {
        let (manager, clock) = manager().await;
        let template = simple("cached").cached(1_000);
        let ctx = ctx("e1", ErrorType::Technical, Severity::Low);

        let first = manager.generate_response(&template, &ctx).await.unwrap();
        clock.advance(999);
        let second = manager.generate_response(&template, &ctx).await.unwrap();
        assert_eq!(first.response_id, second.response_id);

        clock.advance(1);
        let third = manager.generate_response(&template, &ctx).await.unwrap();
        assert_ne!(first.response_id, third.response_id);

        let other = manager
            .generate_response(&template, &ctx.clone().with_timestamp(1))
            .await
            .unwrap();
        assert_eq!(other.response_id, third.response_id);

        assert_eq!(manager.refresh_template_cache().await, 1);
        let stats = manager.cache_stats().await;
        assert_eq!((stats.hits, stats.expired, stats.entries), (2, 1, 0));
    }

    #[tokio::test]
    async fn test_replace_and_unregister() {
        let (manager, _) = manager().await;
        let ctx = ctx("e1", ErrorType::Technical, Severity::Low);
        manager.register_template(simple("t").cached(10_000)).await.unwrap();
        let template = manager.get_template("t").await.unwrap();
        manager.generate_response(&template, &ctx).await.unwrap();
        assert_eq!(manager.cache_stats().await.entries, 1);

        manager.register_template(simple("t")).await.unwrap();
        assert_eq!(manager.cache_stats().await.entries, 0);

        manager.assign_template_to_module("gateway", "t").await.unwrap();
        manager.unregister_template("t").await.unwrap();
        assert_eq!(manager.get_template_for_error(&ctx).await.unwrap().template_id, "default");
        assert!(manager.unregister_template("t").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_default() {
        let clock = Arc::new(ManualClock::new(0));
        let manager = ResponseTemplateManager::with_clock(
            TemplateManagerConfig::default()
                .with_cache_sweep_interval(0)
                .with_builtin_templates(false),
            clock,
        );
        manager.initialize().await.unwrap();
        let ctx = ctx("e1", ErrorType::Technical, Severity::Low);
        assert!(matches!(
            manager.get_template_for_error(&ctx).await,
            Err(TemplateError::TemplateNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_drops_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let manager = ResponseTemplateManager::with_clock(
            TemplateManagerConfig::default().with_cache_sweep_interval(100),
            clock.clone(),
        );
        manager.initialize().await.unwrap();
        let ctx = ctx("e1", ErrorType::Technical, Severity::Low);
        manager.generate_response(&simple("t").cached(50), &ctx).await.unwrap();

        clock.advance(60);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.cache_stats().await.entries, 0);
        manager.shutdown().await;
    }
}

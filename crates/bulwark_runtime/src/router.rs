//! Handler routing.
//!
//! Every module known to the router may carry its own handler. Errors from a
//! module without one, or whose handler is disabled or does not match the
//! error, go to the default handler.

use bulwark_core::condition::all_match;
use bulwark_core::{CoreError, CoreResult, ErrorContext, ModuleRegistration, SharedHandler};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Clone)]
struct Route {
    module_name: String,
    handler: Option<SharedHandler>,
}

/// Router snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStatus {
    /// Modules known to the router
    pub registered_modules: usize,
    /// Modules with an enabled handler of their own
    pub module_handlers: usize,
    /// Name of the default handler
    pub default_handler: String,
    /// Errors routed to a module handler
    pub routed_to_module: u64,
    /// Errors routed to the default handler
    pub routed_to_default: u64,
}

/// Picks the handler for each error
pub struct ResponseRouterEngine {
    default_handler: SharedHandler,
    routes: RwLock<IndexMap<String, Route>>,
    routed_to_module: AtomicU64,
    routed_to_default: AtomicU64,
}

impl ResponseRouterEngine {
    /// Create a router that falls back to `default_handler`
    #[must_use]
    pub fn new(default_handler: SharedHandler) -> Self {
        Self {
            default_handler,
            routes: RwLock::new(IndexMap::new()),
            routed_to_module: AtomicU64::new(0),
            routed_to_default: AtomicU64::new(0),
        }
    }

    /// The fallback handler
    #[must_use]
    pub fn default_handler(&self) -> &SharedHandler {
        &self.default_handler
    }

    /// Add a module and its handler, if it has one
    ///
    /// # Errors
    ///
    /// Returns error if the module id is empty or already routed
    pub async fn register_module(&self, registration: &ModuleRegistration) -> CoreResult<()> {
        if registration.module_id.trim().is_empty() {
            return Err(CoreError::validation("module_id", "must not be empty"));
        }
        let mut routes = self.routes.write().await;
        if routes.contains_key(&registration.module_id) {
            return Err(CoreError::AlreadyExists {
                kind: "route".to_string(),
                id: registration.module_id.clone(),
            });
        }
        routes.insert(
            registration.module_id.clone(),
            Route {
                module_name: registration.module_name.clone(),
                handler: registration.response_handler.clone(),
            },
        );
        info!(
            module_id = %registration.module_id,
            handler = ?registration.response_handler.as_ref().map(|h| h.name()),
            "route registered"
        );
        Ok(())
    }

    /// Remove a module; returns whether it was known
    pub async fn unregister_module(&self, module_id: &str) -> bool {
        let removed = self.routes.write().await.shift_remove(module_id).is_some();
        if removed {
            info!(module_id, "route removed");
        }
        removed
    }

    /// Whether a module is known
    pub async fn contains(&self, module_id: &str) -> bool {
        self.routes.read().await.contains_key(module_id)
    }

    /// Handler for an error
    pub async fn route(&self, ctx: &ErrorContext) -> SharedHandler {
        let module_id = ctx.source.module_id.as_str();
        let candidate = self
            .routes
            .read()
            .await
            .get(module_id)
            .and_then(|route| route.handler.clone());

        if let Some(handler) = candidate {
            if handler.is_enabled() && all_match(handler.conditions(), |field| ctx.lookup(field)) {
                self.routed_to_module.fetch_add(1, Ordering::Relaxed);
                debug!(module_id, handler = handler.name(), "routed to module handler");
                return handler;
            }
            debug!(module_id, handler = handler.name(), "module handler skipped");
        }
        self.routed_to_default.fetch_add(1, Ordering::Relaxed);
        self.default_handler.clone()
    }

    /// Module ids and names in registration order
    pub async fn modules(&self) -> Vec<(String, String)> {
        self.routes
            .read()
            .await
            .iter()
            .map(|(id, route)| (id.clone(), route.module_name.clone()))
            .collect()
    }

    /// Snapshot
    pub async fn status(&self) -> RouterStatus {
        let routes = self.routes.read().await;
        RouterStatus {
            registered_modules: routes.len(),
            module_handlers: routes
                .values()
                .filter(|r| r.handler.as_ref().is_some_and(|h| h.is_enabled()))
                .count(),
            default_handler: self.default_handler.name().to_string(),
            routed_to_module: self.routed_to_module.load(Ordering::Relaxed),
            routed_to_default: self.routed_to_default.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ResponseRouterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseRouterEngine")
            .field("default_handler", &self.default_handler.name())
            .finish_non_exhaustive()
    }
}

//! Module registry manager.

use crate::error::{RegistryError, RegistryResult};
use crate::graph::{self, DependencyMap};
use bulwark_core::{Millis, ModuleRegistration, SharedClock, SystemClock};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Error rate above which a module is reported unhealthy
pub const HEALTHY_ERROR_RATE: f64 = 0.10;

#[derive(Debug, Clone)]
struct ModuleEntry {
    registration: ModuleRegistration,
    registered_at: Millis,
    error_count: u64,
    success_count: u64,
    last_error_at: Option<Millis>,
}

/// Health of one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleHealth {
    /// Module id
    pub module_id: String,
    /// Module name
    pub module_name: String,
    /// Errors reported
    pub error_count: u64,
    /// Successes reported
    pub success_count: u64,
    /// `errors / (errors + successes)`, zero when nothing was reported
    pub error_rate: f64,
    /// `error_rate <= 0.10`
    pub healthy: bool,
    /// Last error time
    pub last_error_at: Option<Millis>,
    /// Registration time
    pub registered_at: Millis,
}

impl ModuleEntry {
    fn health(&self) -> ModuleHealth {
        let total = self.error_count + self.success_count;
        let error_rate = if total == 0 {
            0.0
        } else {
            self.error_count as f64 / total as f64
        };
        ModuleHealth {
            module_id: self.registration.module_id.clone(),
            module_name: self.registration.module_name.clone(),
            error_count: self.error_count,
            success_count: self.success_count,
            error_rate,
            healthy: error_rate <= HEALTHY_ERROR_RATE,
            last_error_at: self.last_error_at,
            registered_at: self.registered_at,
        }
    }
}

/// Registry of participating modules
#[derive(Debug)]
pub struct ModuleRegistryManager {
    modules: RwLock<IndexMap<String, ModuleEntry>>,
    initialized: AtomicBool,
    clock: SharedClock,
}

impl ModuleRegistryManager {
    /// Create an uninitialized registry on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Create an uninitialized registry on `clock`
    #[must_use]
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            modules: RwLock::new(IndexMap::new()),
            initialized: AtomicBool::new(false),
            clock,
        }
    }

    /// Start accepting registrations. Idempotent.
    pub async fn initialize(&self) {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!("module registry initialized");
        }
    }

    /// Drop every registration. Idempotent.
    pub async fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            self.modules.write().await.clear();
            info!("module registry shut down");
        }
    }

    /// Whether `initialize()` has run
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> RegistryResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(RegistryError::NotInitialized)
        }
    }

    /// Register a module
    ///
    /// # Errors
    ///
    /// Returns error if the registration is invalid or the id is taken
    pub async fn register_module(&self, registration: ModuleRegistration) -> RegistryResult<()> {
        self.ensure_initialized()?;
        validate(&registration)?;

        let mut modules = self.modules.write().await;
        let module_id = registration.module_id.clone();
        if modules.contains_key(&module_id) {
            return Err(RegistryError::AlreadyRegistered { module_id });
        }
        info!(
            module_id = %module_id,
            dependencies = ?registration.dependencies,
            "module registered"
        );
        modules.insert(
            module_id,
            ModuleEntry {
                registration,
                registered_at: self.clock.now_millis(),
                error_count: 0,
                success_count: 0,
                last_error_at: None,
            },
        );
        Ok(())
    }

    /// Unregister a module, returning its registration
    ///
    /// # Errors
    ///
    /// Returns error if the module is unknown
    pub async fn unregister_module(&self, module_id: &str) -> RegistryResult<ModuleRegistration> {
        self.ensure_initialized()?;
        let mut modules = self.modules.write().await;
        let entry = modules
            .shift_remove(module_id)
            .ok_or_else(|| not_found(module_id))?;

        let orphans: Vec<&str> = modules
            .values()
            .filter(|e| e.registration.dependencies.iter().any(|d| d == module_id))
            .map(|e| e.registration.module_id.as_str())
            .collect();
        if !orphans.is_empty() {
            warn!(module_id, dependents = ?orphans, "unregistered module still has dependents");
        }
        info!(module_id, "module unregistered");
        Ok(entry.registration)
    }

    /// Look up a module
    ///
    /// # Errors
    ///
    /// Returns error before `initialize()`
    pub async fn get_module(&self, module_id: &str) -> RegistryResult<Option<ModuleRegistration>> {
        self.ensure_initialized()?;
        Ok(self
            .modules
            .read()
            .await
            .get(module_id)
            .map(|e| e.registration.clone()))
    }

    /// All modules in registration order
    ///
    /// # Errors
    ///
    /// Returns error before `initialize()`
    pub async fn list_modules(&self) -> RegistryResult<Vec<ModuleRegistration>> {
        self.ensure_initialized()?;
        Ok(self
            .modules
            .read()
            .await
            .values()
            .map(|e| e.registration.clone())
            .collect())
    }

    /// Number of registered modules
    pub async fn module_count(&self) -> usize {
        self.modules.read().await.len()
    }

    /// Module ids ordered so dependencies come first
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DependencyCycle`] if the dependencies of
    /// registered modules form a cycle
    pub async fn resolve_dependency_order(&self) -> RegistryResult<Vec<String>> {
        self.ensure_initialized()?;
        let map = self.dependency_map().await;
        graph::dependency_order(&map).map_err(|modules| {
            warn!(?modules, "dependency cycle detected");
            RegistryError::DependencyCycle { modules }
        })
    }

    /// Modules that directly depend on `module_id`
    ///
    /// # Errors
    ///
    /// Returns error before `initialize()`
    pub async fn get_dependents(&self, module_id: &str) -> RegistryResult<Vec<String>> {
        self.ensure_initialized()?;
        let map = self.dependency_map().await;
        Ok(graph::dependents_of(&map, module_id))
    }

    async fn dependency_map(&self) -> DependencyMap {
        self.modules
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.registration.dependencies.clone()))
            .collect()
    }

    /// Record an error reported by a module
    ///
    /// # Errors
    ///
    /// Returns error if the module is unknown
    pub async fn increment_error_count(&self, module_id: &str) -> RegistryResult<u64> {
        self.ensure_initialized()?;
        let now = self.clock.now_millis();
        let mut modules = self.modules.write().await;
        let entry = modules.get_mut(module_id).ok_or_else(|| not_found(module_id))?;
        entry.error_count += 1;
        entry.last_error_at = Some(now);
        debug!(module_id, errors = entry.error_count, "module error recorded");
        Ok(entry.error_count)
    }

    /// Record a success reported by a module
    ///
    /// # Errors
    ///
    /// Returns error if the module is unknown
    pub async fn increment_success_count(&self, module_id: &str) -> RegistryResult<u64> {
        self.ensure_initialized()?;
        let mut modules = self.modules.write().await;
        let entry = modules.get_mut(module_id).ok_or_else(|| not_found(module_id))?;
        entry.success_count += 1;
        Ok(entry.success_count)
    }

    /// Zero a module's counters
    ///
    /// # Errors
    ///
    /// Returns error if the module is unknown
    pub async fn reset_counters(&self, module_id: &str) -> RegistryResult<()> {
        self.ensure_initialized()?;
        let mut modules = self.modules.write().await;
        let entry = modules.get_mut(module_id).ok_or_else(|| not_found(module_id))?;
        entry.error_count = 0;
        entry.success_count = 0;
        entry.last_error_at = None;
        Ok(())
    }

    /// Health of one module
    ///
    /// # Errors
    ///
    /// Returns error if the module is unknown
    pub async fn get_module_health(&self, module_id: &str) -> RegistryResult<ModuleHealth> {
        self.ensure_initialized()?;
        self.modules
            .read()
            .await
            .get(module_id)
            .map(ModuleEntry::health)
            .ok_or_else(|| not_found(module_id))
    }

    /// Health of every module, in registration order
    ///
    /// # Errors
    ///
    /// Returns error before `initialize()`
    pub async fn get_all_modules_health(&self) -> RegistryResult<Vec<ModuleHealth>> {
        self.ensure_initialized()?;
        Ok(self.modules.read().await.values().map(ModuleEntry::health).collect())
    }
}

impl Default for ModuleRegistryManager {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(module_id: &str) -> RegistryError {
    RegistryError::ModuleNotFound {
        module_id: module_id.to_string(),
    }
}

fn validate(registration: &ModuleRegistration) -> RegistryResult<()> {
    let invalid = |reason: &str| RegistryError::InvalidRegistration {
        module_id: registration.module_id.clone(),
        reason: reason.to_string(),
    };
    if registration.module_id.trim().is_empty() {
        return Err(invalid("module_id must not be empty"));
    }
    if registration.module_name.trim().is_empty() {
        return Err(invalid("module_name must not be empty"));
    }
    if registration.dependencies.iter().any(|d| d == &registration.module_id) {
        return Err(invalid("module cannot depend on itself"));
    }
    Ok(())
}

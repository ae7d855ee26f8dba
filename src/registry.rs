//! Module registry
//!
//! Name-indexed map of module factories. The registry knows nothing about
//! DAGs and does not validate config against a module's config schema; that
//! is the module's responsibility inside `init`.
//!
//! A process-wide default instance is available through
//! [`ModuleRegistry::global`] for CLI ergonomics; construct fresh registries
//! with [`ModuleRegistry::new`] for test isolation. Registration is meant to
//! happen at process start; reads are safe during a run.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::warn;

use crate::contract::{ConfigMap, ModuleMetadata, ScanModule};
use crate::error::{Result, SentraError};

/// Factory producing fresh, uninitialized module instances
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn ScanModule> + Send + Sync>;

static GLOBAL: Lazy<ModuleRegistry> = Lazy::new(ModuleRegistry::new);

/// Process-wide or per-test map of module factories
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: Arc<DashMap<String, ModuleFactory>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry
    pub fn global() -> &'static ModuleRegistry {
        &GLOBAL
    }

    /// Register a factory under a name; overwrites with a warning
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ScanModule> + Send + Sync + 'static,
    {
        let name = name.into();
        if self
            .factories
            .insert(name.clone(), Arc::new(factory))
            .is_some()
        {
            warn!(component = "registry", module = %name, "module factory overwritten");
        }
    }

    /// Instantiate a module and run its `init` phase
    ///
    /// Init failures are wrapped with the module name for diagnosis.
    pub fn instantiate(
        &self,
        instance_id: &str,
        name: &str,
        config: &ConfigMap,
    ) -> Result<Box<dyn ScanModule>> {
        let factory = self
            .factories
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SentraError::ModuleNotFound {
                name: name.to_string(),
            })?;

        let mut module = (*factory)();
        module
            .init(instance_id, config)
            .map_err(|e| SentraError::ModuleInitFailed {
                module: name.to_string(),
                details: e.to_string(),
            })?;
        Ok(module)
    }

    /// Metadata for a registered module (from a throwaway instance)
    pub fn metadata(&self, name: &str) -> Option<ModuleMetadata> {
        let factory = self
            .factories
            .get(name)
            .map(|entry| Arc::clone(entry.value()))?;
        let module = (*factory)();
        Some(module.metadata().clone())
    }

    /// Registered names in stable sorted order (planner determinism)
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

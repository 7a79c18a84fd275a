//! Module registry - what is loaded right now, in load order

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::loader::LoadedPlugin;
use crate::domain::entities::ModuleDescriptor;

/// A registry entry: the descriptor shown to users and the running plugin
#[derive(Clone)]
pub struct LoadedModule {
    pub descriptor: ModuleDescriptor,
    pub plugin: Arc<LoadedPlugin>,
}

/// Registry of loaded modules.
///
/// The registry holds the only strong reference to each plugin; command
/// bindings keep weak ones, so removing an entry is what lets a plugin go.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<Vec<LoadedModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<LoadedModule>> {
        self.modules.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<LoadedModule>> {
        self.modules.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a module, replacing an entry with the same name in place
    pub fn insert(&self, module: LoadedModule) {
        let mut modules = self.write();
        match modules.iter_mut().find(|m| m.descriptor.name == module.descriptor.name) {
            Some(existing) => *existing = module,
            None => modules.push(module),
        }
    }

    pub fn remove(&self, name: &str) -> Option<LoadedModule> {
        let mut modules = self.write();
        let index = modules.iter().position(|m| m.descriptor.name == name)?;
        Some(modules.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<ModuleDescriptor> {
        self.read()
            .iter()
            .find(|m| m.descriptor.name == name)
            .map(|m| m.descriptor.clone())
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        self.read()
            .iter()
            .find(|m| m.descriptor.name == name)
            .map(|m| m.plugin.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|m| m.descriptor.name.clone()).collect()
    }

    pub fn list(&self) -> Vec<ModuleDescriptor> {
        self.read().iter().map(|m| m.descriptor.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|m| m.descriptor.name == name)
    }

}

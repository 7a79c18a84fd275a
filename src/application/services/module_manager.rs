//! Module manager - load, unload and reload plugins at runtime

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::application::errors::{
    BotError, CommandError, LoadError, ModuleError, StorageError, TransportError, UnloadError,
};
use crate::application::routing::grammar::is_word;
use crate::application::routing::{
    BindingOwner, CommandContext, CommandRouter, Handler, HandlerFuture,
};
use crate::domain::entities::module::{is_valid_module_name, DEFAULT_DESCRIPTION};
use crate::domain::entities::{LoadOrigin, ModuleDescriptor, ModuleState};
use crate::infrastructure::backup::BackupStore;
use crate::infrastructure::config::{Config, Paths};
use crate::infrastructure::dependencies::DependencyResolver;
use crate::infrastructure::plugins::{
    LoadedModule, LoadedPlugin, MessageEnvelope, ModuleCache, ModuleRegistry, PluginAction,
    PluginLoader, PluginManifest,
};
use crate::infrastructure::storage::StateStore;

/// Result of loading every module at startup
#[derive(Debug, Default, Clone)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Marks a module name as busy until dropped
struct InFlight<'a> {
    manager: &'a ModuleManager,
    name: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.manager.in_flight().remove(&self.name);
    }
}

/// Orchestrates the module lifecycle
pub struct ModuleManager {
    loader: PluginLoader,
    registry: ModuleRegistry,
    backups: BackupStore,
    dependencies: DependencyResolver,
    state: StateStore,
    router: Arc<CommandRouter>,
    load_timeout: Duration,
    in_flight: Mutex<HashMap<String, ModuleState>>,
}

impl ModuleManager {
    pub fn new(config: &Config, paths: &Paths, router: Arc<CommandRouter>) -> Self {
        Self {
            loader: PluginLoader::new(&paths.mods, ModuleCache::new(&paths.cache), &config.plugins),
            registry: ModuleRegistry::new(),
            backups: BackupStore::new(&paths.backups),
            dependencies: DependencyResolver::from_config(&config.dependencies),
            state: StateStore::new(paths),
            router,
            load_timeout: config.plugins.load_timeout(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    /// Directory module files are loaded from
    pub fn plugin_dir(&self) -> &Path {
        self.loader.plugin_dir()
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.loader.is_supported(path)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, ModuleState>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, name: &str, state: ModuleState) -> Option<InFlight<'_>> {
        let mut in_flight = self.in_flight();
        if in_flight.contains_key(name) {
            return None;
        }
        in_flight.insert(name.to_string(), state);
        Some(InFlight {
            manager: self,
            name: name.to_string(),
        })
    }

    fn set_state(&self, name: &str, state: ModuleState) {
        if let Some(current) = self.in_flight().get_mut(name) {
            *current = state;
        }
    }

    /// Lifecycle state of `name` right now
    pub fn state(&self, name: &str) -> ModuleState {
        if let Some(state) = self.in_flight().get(name) {
            return *state;
        }
        if self.registry.contains(name) {
            ModuleState::Loaded
        } else {
            ModuleState::Unloaded
        }
    }

    pub fn get(&self, name: &str) -> Option<ModuleDescriptor> {
        self.registry.get(name)
    }

    /// Loaded modules in load order
    pub fn list(&self) -> Vec<ModuleDescriptor> {
        self.registry.list()
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Load `name` from the modules directory, replacing a loaded copy
    pub async fn load(
        &self,
        name: &str,
        origin: LoadOrigin,
    ) -> Result<ModuleDescriptor, LoadError> {
        if !is_valid_module_name(name) {
            return Err(LoadError::InvalidName(name.to_string()));
        }
        let _guard = self
            .claim(name, ModuleState::Loading)
            .ok_or_else(|| LoadError::Busy(name.to_string()))?;

        let previous = match self.registry.get(name) {
            Some(existing) => {
                self.set_state(name, ModuleState::Unloading);
                self.unload_locked(name).await.map_err(|source| LoadError::Replace {
                    name: name.to_string(),
                    source,
                })?;
                self.set_state(name, ModuleState::Loading);
                Some(existing.load_count)
            }
            None => None,
        };

        self.load_locked(name, origin, previous).await
    }

    /// Unload `name`. `on_unload` failures are logged; the module is removed regardless.
    pub async fn unload(&self, name: &str) -> Result<(), UnloadError> {
        let _guard = self
            .claim(name, ModuleState::Unloading)
            .ok_or_else(|| UnloadError::Busy(name.to_string()))?;
        self.unload_locked(name).await
    }

    /// Unload if loaded, then load again from disk
    pub async fn reload(&self, name: &str) -> Result<ModuleDescriptor, ModuleError> {
        if !is_valid_module_name(name) {
            return Err(LoadError::InvalidName(name.to_string()).into());
        }
        let _guard = self
            .claim(name, ModuleState::Unloading)
            .ok_or_else(|| LoadError::Busy(name.to_string()))?;

        let previous = match self.registry.get(name) {
            Some(existing) => {
                self.unload_locked(name).await?;
                Some(existing.load_count)
            }
            None => None,
        };

        self.set_state(name, ModuleState::Loading);
        Ok(self.load_locked(name, LoadOrigin::Trusted, previous).await?)
    }

    /// Load the modules that were loaded before a restart, or everything in
    /// the modules directory when there is no saved list.
    pub async fn load_all(&self) -> LoadSummary {
        let names = match self.state.take_loaded().await {
            Ok(Some(names)) => {
                tracing::info!("Restoring {} modules from the previous run", names.len());
                names
            }
            Ok(None) => self.loader.discover().into_iter().map(|(name, _)| name).collect(),
            Err(e) => {
                tracing::warn!("Could not read the saved module list: {}", e);
                self.loader.discover().into_iter().map(|(name, _)| name).collect()
            }
        };

        let mut summary = LoadSummary::default();
        for name in names {
            match self.load(&name, LoadOrigin::Trusted).await {
                Ok(_) => summary.loaded.push(name),
                Err(e) => summary.failed.push((name, e.to_string())),
            }
        }

        tracing::info!(
            "Loaded {} modules ({} failed)",
            summary.loaded.len(),
            summary.failed.len()
        );
        summary
    }

    /// Persist the names of loaded modules for the next boot
    pub async fn save_loaded_state(&self) -> Result<(), StorageError> {
        self.state.save_loaded(&self.registry.names()).await
    }

    /// Unload everything, last loaded first
    pub async fn shutdown(&self) {
        for name in self.registry.names().into_iter().rev() {
            if let Err(e) = self.unload(&name).await {
                tracing::warn!(module = %name, "Failed to unload during shutdown: {}", e);
            }
        }
    }

    /// Remove shadow copies of modules that are not loaded
    pub async fn clean_cache(&self) -> std::io::Result<usize> {
        self.loader.cache().clean(&self.registry.names()).await
    }

    async fn unload_locked(&self, name: &str) -> Result<(), UnloadError> {
        let (descriptor, plugin) = self
            .registry
            .get(name)
            .zip(self.registry.plugin(name))
            .ok_or_else(|| UnloadError::NotFound(name.to_string()))?;

        if let Err(e) = plugin.on_unload().await {
            tracing::warn!(module = %name, "on_unload failed: {}", e);
        }

        let removed = self.router.unregister(&descriptor.handlers);
        plugin.close().await;
        self.registry.remove(name);

        tracing::info!(module = %name, bindings = removed, "Module unloaded");
        Ok(())
    }

    async fn load_locked(
        &self,
        name: &str,
        origin: LoadOrigin,
        previous: Option<u32>,
    ) -> Result<ModuleDescriptor, LoadError> {
        let path = self
            .loader
            .locate(name)
            .ok_or_else(|| LoadError::NotFound(name.to_string()))?;

        let result = self.start(name, &path, previous).await;

        if let Err(e) = &result {
            tracing::error!(module = %name, "Failed to load module: {}", e);
            if origin == LoadOrigin::Fresh && e.rejects_upload() {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        tracing::info!(module = %name, "Removed rejected file {}", path.display())
                    }
                    Err(e) => {
                        tracing::warn!(module = %name, "Could not remove {}: {}", path.display(), e)
                    }
                }
            }
        }
        result
    }

    async fn start(
        &self,
        name: &str,
        path: &Path,
        previous: Option<u32>,
    ) -> Result<ModuleDescriptor, LoadError> {
        if let Err(e) = self.loader.cache().invalidate(name).await {
            tracing::warn!(module = %name, "Could not clear cached copies: {}", e);
        }
        if let Err(e) = self.backups.snapshot(path).await {
            tracing::warn!(module = %name, "Backup failed: {}", e);
        }

        let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
            name: name.to_string(),
            source,
        })?;
        let source = String::from_utf8_lossy(&bytes);
        let manifest = PluginManifest::parse(&source);

        self.dependencies
            .resolve(&source)
            .await
            .map_err(|source| LoadError::Dependency {
                name: name.to_string(),
                source,
            })?;

        let plugin = self
            .loader
            .open(name, path)
            .await
            .map_err(|source| LoadError::Host {
                name: name.to_string(),
                source,
            })?;
        let plugin = Arc::new(plugin);

        match self.activate(name, path, &plugin, manifest, previous).await {
            Ok(descriptor) => Ok(descriptor),
            Err(e) => {
                self.router.unregister_all(&BindingOwner::module(name));
                plugin.close().await;
                Err(e)
            }
        }
    }

    /// Run `on_load`, bind the declared commands and record the module
    async fn activate(
        &self,
        name: &str,
        path: &Path,
        plugin: &Arc<LoadedPlugin>,
        manifest: PluginManifest,
        previous: Option<u32>,
    ) -> Result<ModuleDescriptor, LoadError> {
        let on_load = plugin.on_load(self.router.prefix());
        let (info, commands) = match tokio::time::timeout(self.load_timeout, on_load).await {
            Ok(Ok(declared)) => declared,
            Ok(Err(source)) => {
                return Err(LoadError::Hook {
                    name: name.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(LoadError::Timeout {
                    name: name.to_string(),
                    secs: self.load_timeout.as_secs(),
                })
            }
        };

        if let Some(bad) = commands.iter().find(|c| !is_word(&c.name)) {
            return Err(LoadError::Registration {
                name: name.to_string(),
                reason: format!("{:?} is not a valid command name", bad.name),
            });
        }

        let owner = BindingOwner::module(name);
        let mut descriptor = ModuleDescriptor::new(name, path);
        for spec in &commands {
            let handler = plugin_handler(Arc::downgrade(plugin), name.to_string());
            let id = self.router.register(&spec.name, spec.grammar, handler, owner.clone());
            descriptor.handlers.push(id);
            let description = if spec.description.is_empty() {
                DEFAULT_DESCRIPTION.to_string()
            } else {
                spec.description.clone()
            };
            descriptor.commands.push((spec.name.clone(), description));
        }

        if let Some(version) = info.version.or(manifest.version) {
            descriptor.version = version;
        }
        if let Some(author) = info.author.or(manifest.author) {
            descriptor.author = author;
        }
        if let Some(description) = info.description.or(manifest.description) {
            descriptor.description = description;
        }
        descriptor.load_count = previous.map_or(1, |count| count + 1);

        self.registry.insert(LoadedModule {
            descriptor: descriptor.clone(),
            plugin: plugin.clone(),
        });

        tracing::info!(
            module = %name,
            version = %descriptor.version,
            commands = descriptor.commands.len(),
            load_count = descriptor.load_count,
            "Module loaded ({})",
            plugin.kind()
        );
        Ok(descriptor)
    }
}

/// Handler for a plugin command. Holds only a weak reference, so a binding
/// that outlives its module fails instead of keeping the plugin alive.
fn plugin_handler(plugin: Weak<LoadedPlugin>, module: String) -> Handler {
    Arc::new(move |ctx: CommandContext| -> HandlerFuture {
        let plugin = plugin.clone();
        let module = module.clone();
        Box::pin(async move {
            let plugin = plugin.upgrade().ok_or_else(|| {
                CommandError::Unavailable(format!("module {} is not loaded", module))
            })?;
            let actions = plugin
                .invoke(&ctx.command, ctx.args.clone(), MessageEnvelope::from(&ctx.message))
                .await?;
            drop(plugin);
            apply_actions(&ctx, actions).await?;
            Ok::<(), BotError>(())
        })
    })
}

/// Carry out what a plugin asked for, in order
async fn apply_actions(
    ctx: &CommandContext,
    actions: Vec<PluginAction>,
) -> Result<(), TransportError> {
    let message = &ctx.message;
    for action in actions {
        match action {
            PluginAction::Reply { text } => {
                ctx.respond(&text).await?;
            }
            PluginAction::Edit { text } => {
                ctx.transport
                    .edit_message(&message.chat_id, &message.id, &text)
                    .await?;
            }
            PluginAction::Send { chat_id, text } => {
                ctx.transport.send_message(&chat_id, &text).await?;
            }
            PluginAction::Delete => {
                ctx.transport.delete_message(&message.chat_id, &message.id).await?;
            }
        }
    }
    Ok(())
}

//! Plugin loader - starts plugins from files in the modules directory

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::cache::ModuleCache;
use super::native::NativeHost;
use super::protocol::{HostRequest, MessageEnvelope, PluginAction, PluginInfo, PluginResponse};
use super::worker::WorkerHost;
use crate::application::errors::PluginError;
use crate::domain::entities::module::is_valid_module_name;
use crate::domain::entities::CommandSpec;
use crate::infrastructure::config::PluginConfig;

/// Shared library extensions opened in-process
pub const NATIVE_EXTENSIONS: &[&str] = &["so", "dylib", "dll"];

/// A running plugin, whatever executes it
#[async_trait]
pub trait PluginHost: Send + Sync {
    /// Send one request and wait for its response
    async fn call(&self, request: &HostRequest) -> Result<PluginResponse, PluginError>;

    /// Release the plugin. Further calls fail with `PluginError::Closed`.
    async fn shutdown(&self);

    fn kind(&self) -> &'static str;
}

/// A started plugin and the hooks the runtime drives it through
pub struct LoadedPlugin {
    name: String,
    host: Box<dyn PluginHost>,
    call_timeout: Duration,
}

impl LoadedPlugin {
    pub fn new(name: impl Into<String>, host: Box<dyn PluginHost>, call_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            host,
            call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.host.kind()
    }

    /// Run `on_load`, returning the plugin's metadata and command declarations.
    ///
    /// No timeout is applied here; the caller owns the load deadline.
    pub async fn on_load(
        &self,
        prefix: &str,
    ) -> Result<(PluginInfo, Vec<CommandSpec>), PluginError> {
        let request = HostRequest::Load {
            prefix: prefix.to_string(),
        };
        match self.host.call(&request).await? {
            PluginResponse::Loaded { info, commands } => Ok((info, commands)),
            other => Err(unexpected("loaded", &other)),
        }
    }

    /// Run one command. A plugin that misses the deadline is shut down.
    pub async fn invoke(
        &self,
        command: &str,
        args: Vec<String>,
        message: MessageEnvelope,
    ) -> Result<Vec<PluginAction>, PluginError> {
        let request = HostRequest::Invoke {
            command: command.to_string(),
            args,
            message,
        };
        match self.call_with_deadline(&request).await? {
            PluginResponse::Actions { actions } => Ok(actions),
            other => Err(unexpected("actions", &other)),
        }
    }

    pub async fn on_unload(&self) -> Result<(), PluginError> {
        match self.call_with_deadline(&HostRequest::Unload).await? {
            PluginResponse::Unloaded => Ok(()),
            other => Err(unexpected("unloaded", &other)),
        }
    }

    pub async fn close(&self) {
        self.host.shutdown().await;
    }

    async fn call_with_deadline(
        &self,
        request: &HostRequest,
    ) -> Result<PluginResponse, PluginError> {
        match tokio::time::timeout(self.call_timeout, self.host.call(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Plugin {} timed out, shutting it down", self.name);
                self.host.shutdown().await;
                Err(PluginError::Timeout(self.call_timeout.as_secs()))
            }
        }
    }
}

fn unexpected(expected: &str, got: &PluginResponse) -> PluginError {
    PluginError::Protocol(format!("expected {} response, got {:?}", expected, got))
}

/// Finds plugin files and starts them
pub struct PluginLoader {
    plugin_dir: PathBuf,
    interpreters: BTreeMap<String, Vec<String>>,
    cache: ModuleCache,
    call_timeout: Duration,
}

impl PluginLoader {
    pub fn new(plugin_dir: impl Into<PathBuf>, cache: ModuleCache, config: &PluginConfig) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            interpreters: config.interpreters.clone(),
            cache,
            call_timeout: config.call_timeout(),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    fn extension(path: &Path) -> Option<&str> {
        path.extension().and_then(|e| e.to_str())
    }

    fn is_native(path: &Path) -> bool {
        Self::extension(path).is_some_and(|ext| NATIVE_EXTENSIONS.contains(&ext))
    }

    /// Whether a file with this extension can be started
    pub fn is_supported(&self, path: &Path) -> bool {
        Self::is_native(path)
            || Self::extension(path).is_some_and(|ext| self.interpreters.contains_key(ext))
    }

    fn module_files(&self) -> Vec<(String, PathBuf)> {
        let entries = match std::fs::read_dir(&self.plugin_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    "Cannot read modules directory {}: {}",
                    self.plugin_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut files: Vec<(String, PathBuf)> = entries
            .filter_map(|entry| match entry {
                Ok(e) => Some(e.path()),
                Err(e) => {
                    tracing::warn!("Failed to read directory entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_file() && self.is_supported(path))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                Some((stem, path))
            })
            .collect();
        files.sort();
        files
    }

    /// Source file for `name`; the first by file name when several extensions exist
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.module_files()
            .into_iter()
            .find(|(stem, _)| stem == name)
            .map(|(_, path)| path)
    }

    /// Every loadable module in the directory, sorted by name.
    ///
    /// Names starting with `_` or `.` are skipped, as are names that could not
    /// be addressed by a command.
    pub fn discover(&self) -> Vec<(String, PathBuf)> {
        let mut seen = Vec::<String>::new();
        self.module_files()
            .into_iter()
            .filter(|(name, _)| !name.starts_with('_') && !name.starts_with('.'))
            .filter(|(name, _)| is_valid_module_name(name))
            .filter(|(name, _)| {
                if seen.contains(name) {
                    return false;
                }
                seen.push(name.clone());
                true
            })
            .collect()
    }

    /// Start the plugin at `path` under `name`
    pub async fn open(&self, name: &str, path: &Path) -> Result<LoadedPlugin, PluginError> {
        let host: Box<dyn PluginHost> = if Self::is_native(path) {
            let shadow = self.cache.shadow(name, path).await?;
            Box::new(NativeHost::open(name, &shadow)?)
        } else {
            let interpreter = Self::extension(path)
                .and_then(|ext| self.interpreters.get(ext))
                .ok_or_else(|| PluginError::Unsupported(path.display().to_string()))?;
            Box::new(WorkerHost::spawn(name, interpreter, path)?)
        };

        tracing::info!("Started {} plugin {} from {}", host.kind(), name, path.display());
        Ok(LoadedPlugin::new(name, host, self.call_timeout))
    }
}

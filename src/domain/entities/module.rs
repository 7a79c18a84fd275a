use chrono::{DateTime, Utc};
use std::path::PathBuf;

use super::BindingId;

pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_AUTHOR: &str = "Unknown";
pub const DEFAULT_DESCRIPTION: &str = "No description provided";

/// Lifecycle state of a module name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl ModuleState {
    pub fn as_str(&self) -> &str {
        match self {
            ModuleState::Unloaded => "unloaded",
            ModuleState::Loading => "loading",
            ModuleState::Loaded => "loaded",
            ModuleState::Unloading => "unloading",
        }
    }
}

/// Where the source file of a load came from.
///
/// A `Fresh` file was just written by an upload or download and is deleted
/// again when it fails to load. A `Trusted` file is never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    Trusted,
    Fresh,
}

/// Everything the runtime knows about a loaded module
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    /// Command name and description, in declaration order
    pub commands: Vec<(String, String)>,
    pub handlers: Vec<BindingId>,
    pub source_path: PathBuf,
    pub loaded_at: DateTime<Utc>,
    pub load_count: u32,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: DEFAULT_VERSION.to_string(),
            author: DEFAULT_AUTHOR.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            commands: Vec::new(),
            handlers: Vec::new(),
            source_path: source_path.into(),
            loaded_at: Utc::now(),
            load_count: 1,
        }
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|(name, _)| name.as_str())
    }

    /// Minutes since the module was (re)loaded
    pub fn uptime_minutes(&self) -> i64 {
        (Utc::now() - self.loaded_at).num_minutes()
    }
}

/// Module names are used as file stems and command arguments, so they are
/// restricted to letters, digits and underscores.
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

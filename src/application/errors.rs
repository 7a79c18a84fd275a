//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("{0}")]
    Unload(#[from] UnloadError),

    #[error("{0}")]
    Module(#[from] ModuleError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by a transport adapter
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Not supported by this transport: {0}")]
    Unsupported(&'static str),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while installing a plugin's declared dependencies
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("No installer configured for dependencies: {0}")]
    NoInstaller(String),

    #[error("Failed to start installer: {0}")]
    Spawn(String),

    #[error("Dependency installation failed ({status}): {stderr}")]
    InstallFailed { status: String, stderr: String },

    #[error("Dependency installation timed out after {0}s")]
    Timeout(u64),
}

/// Failures talking to a plugin host
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Unsupported plugin file: {0}")]
    Unsupported(String),

    #[error("Failed to start plugin: {0}")]
    Spawn(String),

    #[error("Failed to open plugin library: {0}")]
    Library(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Plugin reported an error: {0}")]
    Remote(String),

    #[error("Plugin did not answer within {0}s")]
    Timeout(u64),

    #[error("Plugin host is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Module load failures
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Invalid module name: {0}")]
    InvalidName(String),

    #[error("Module {0} not found")]
    NotFound(String),

    #[error("Module {0} is busy with another operation")]
    Busy(String),

    #[error("Module {name}: {source}")]
    Dependency {
        name: String,
        #[source]
        source: DependencyError,
    },

    #[error("Module {name} failed to start: {source}")]
    Host {
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("Module {name} on_load failed: {source}")]
    Hook {
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("Module {name} on_load did not finish within {secs}s")]
    Timeout { name: String, secs: u64 },

    #[error("Module {name} declared an invalid command: {reason}")]
    Registration { name: String, reason: String },

    #[error("Module {name} could not replace the loaded copy: {source}")]
    Replace {
        name: String,
        #[source]
        source: UnloadError,
    },

    #[error("Module {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    /// Whether a freshly written source file should be deleted after this failure.
    ///
    /// Only failures of the plugin itself reject the upload; a missing
    /// dependency leaves the file in place so the load can be retried.
    pub fn rejects_upload(&self) -> bool {
        matches!(
            self,
            LoadError::Host { .. }
                | LoadError::Hook { .. }
                | LoadError::Timeout { .. }
                | LoadError::Registration { .. }
        )
    }
}

/// Module unload failures
#[derive(Error, Debug)]
pub enum UnloadError {
    #[error("Module {0} is not loaded")]
    NotFound(String),

    #[error("Module {0} is busy with another operation")]
    Busy(String),
}

/// Reload failures: either half of unload-then-load
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Unload(#[from] UnloadError),
}

/// Failures fetching from the module repository
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("No module repository configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found in the repository: {0}")]
    NotFound(String),

    #[error("Invalid module index: {0}")]
    Parse(String),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Pending restart record could not be used
#[derive(Error, Debug)]
pub enum RestartStatusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt restart status: {0}")]
    Corrupt(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

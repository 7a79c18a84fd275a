//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::application::errors::ConfigError;

/// Prefix used when `prefix.txt` is missing or invalid
pub const DEFAULT_PREFIX: &str = ".";

/// Longest prefix accepted, in characters
pub const MAX_PREFIX_CHARS: usize = 3;

/// Bot configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub plugins: PluginConfig,
    pub dependencies: DependencyConfig,
    pub repository: RepositoryConfig,
    pub adapters: AdaptersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    /// Identity allowed to run commands. Defaults to the transport's own account.
    pub owner_id: Option<String>,
    /// Root of the state directory (modules, backups, logs, restart records)
    pub root: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "hotplug-bot".to_string(),
            owner_id: None,
            root: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PluginConfig {
    /// File extension to interpreter command for worker plugins
    pub interpreters: BTreeMap<String, Vec<String>>,
    pub load_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        let mut interpreters = BTreeMap::new();
        interpreters.insert("py".to_string(), vec!["python3".to_string(), "-u".to_string()]);
        interpreters.insert("sh".to_string(), vec!["sh".to_string()]);
        Self {
            interpreters,
            load_timeout_secs: 30,
            call_timeout_secs: 60,
        }
    }
}

impl PluginConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DependencyConfig {
    /// Installer command; package names are appended to it
    pub installer: Vec<String>,
    /// System package installer for `system_requires:`, e.g. `[sudo, apt-get, install, -y]`
    pub system_installer: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            installer: ["python3", "-m", "pip", "install", "--upgrade"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            system_installer: Vec::new(),
            timeout_secs: Some(600),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RepositoryConfig {
    /// Base URL raw module files are downloaded from
    pub raw_url: Option<String>,
    /// Extension assumed when a download names no extension
    pub default_extension: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            raw_url: None,
            default_extension: "py".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdaptersConfig {
    pub telegram: Option<TelegramConfig>,
    pub console: Option<ConsoleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConsoleConfig {
    pub enabled: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Parse a YAML config file. Call `validate` once overrides are applied.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))
    }

    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Overlay `BOT_TOKEN`, `BOT_OWNER_ID` and `BOT_ROOT`
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            self.set_token(token);
        }

        if let Ok(owner) = std::env::var("BOT_OWNER_ID") {
            self.bot.owner_id = Some(owner);
        }

        if let Ok(root) = std::env::var("BOT_ROOT") {
            self.bot.root = PathBuf::from(root);
        }
    }

    pub fn set_token(&mut self, token: String) {
        let tg = self.adapters.telegram.get_or_insert_with(TelegramConfig::default);
        tg.token = Some(token);
        tg.enabled = true;
    }

    /// Telegram token, if the Telegram adapter is enabled
    pub fn telegram_token(&self) -> Option<&str> {
        self.adapters
            .telegram
            .as_ref()
            .filter(|t| t.enabled)
            .and_then(|t| t.token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugins.load_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "plugins.load-timeout-secs must be positive".into(),
            ));
        }
        if self.plugins.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "plugins.call-timeout-secs must be positive".into(),
            ));
        }
        if let Some(tg) = self.adapters.telegram.as_ref().filter(|t| t.enabled) {
            if tg.token.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingField("adapters.telegram.token".into()));
            }
            if self.bot.owner_id.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingField("bot.owner-id".into()));
            }
        }
        Ok(())
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.bot.root)
    }
}

/// Everything the runtime keeps on disk, under one root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub mods: PathBuf,
    pub backups: PathBuf,
    pub cache: PathBuf,
    pub prefix_file: PathBuf,
    pub log_file: PathBuf,
    pub loaded_state: PathBuf,
    pub restart_status: PathBuf,
}

impl Paths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            mods: root.join("mods"),
            backups: root.join("backups"),
            cache: root.join("cache"),
            prefix_file: root.join("prefix.txt"),
            log_file: root.join("hotplug.log"),
            loaded_state: root.join(".loaded_mods"),
            restart_status: root.join(".restart_status.json"),
            root,
        }
    }

    /// Create the directories the runtime writes into
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.root, &self.mods, &self.backups, &self.cache] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Accept a prefix of 1 to 3 characters after trimming whitespace
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let prefix = raw.trim();
    let chars = prefix.chars().count();
    (chars > 0 && chars <= MAX_PREFIX_CHARS).then(|| prefix.to_string())
}

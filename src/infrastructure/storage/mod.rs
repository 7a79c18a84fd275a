//! File-based state that survives a restart
//!
//! Three small files live under the root: the command prefix, the list of
//! modules loaded at the time of a restart, and the pending restart record.
//! The last two are consumed once on boot and deleted.

use std::io::ErrorKind;
use std::path::PathBuf;

use crate::application::errors::{RestartStatusError, StorageError};
use crate::domain::entities::RestartStatus;
use crate::infrastructure::config::{normalize_prefix, Paths, DEFAULT_PREFIX};

/// Durable state files
#[derive(Debug, Clone)]
pub struct StateStore {
    prefix_path: PathBuf,
    loaded_path: PathBuf,
    restart_path: PathBuf,
}

async fn remove_if_exists(path: &PathBuf) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn write_atomic(path: &PathBuf, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}

impl StateStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            prefix_path: paths.prefix_file.clone(),
            loaded_path: paths.loaded_state.clone(),
            restart_path: paths.restart_status.clone(),
        }
    }

    /// Configured prefix, falling back to the default when missing or invalid
    pub async fn read_prefix(&self) -> String {
        match tokio::fs::read_to_string(&self.prefix_path).await {
            Ok(raw) => normalize_prefix(&raw).unwrap_or_else(|| {
                tracing::warn!("Ignoring invalid prefix {:?}, using {:?}", raw, DEFAULT_PREFIX);
                DEFAULT_PREFIX.to_string()
            }),
            Err(_) => DEFAULT_PREFIX.to_string(),
        }
    }

    pub async fn write_prefix(&self, prefix: &str) -> Result<String, StorageError> {
        let prefix = normalize_prefix(prefix).ok_or_else(|| {
            StorageError::InvalidValue(format!("prefix must be 1-3 characters, got {:?}", prefix))
        })?;
        write_atomic(&self.prefix_path, prefix.as_bytes()).await?;
        Ok(prefix)
    }

    /// Persist module names in load order, one per line
    pub async fn save_loaded(&self, names: &[String]) -> Result<(), StorageError> {
        write_atomic(&self.loaded_path, names.join("\n").as_bytes()).await?;
        Ok(())
    }

    /// Read and delete the loaded-modules list
    pub async fn take_loaded(&self) -> Result<Option<Vec<String>>, StorageError> {
        let content = match tokio::fs::read_to_string(&self.loaded_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        remove_if_exists(&self.loaded_path).await?;

        Ok(Some(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }

    pub async fn save_restart_status(&self, status: &RestartStatus) -> Result<(), StorageError> {
        let json = serde_json::to_vec(status)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        write_atomic(&self.restart_path, &json).await?;
        Ok(())
    }

    /// Read and delete the pending restart record.
    ///
    /// A corrupt record is deleted as well, so it is reported only once.
    pub async fn take_restart_status(&self) -> Result<Option<RestartStatus>, RestartStatusError> {
        let content = match tokio::fs::read(&self.restart_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        remove_if_exists(&self.restart_path).await?;

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| RestartStatusError::Corrupt(e.to_string()))
    }
}

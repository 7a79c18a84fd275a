//! Day-bucketed copies of module sources, taken before every load

use chrono::{Local, NaiveDate};
use std::io;
use std::path::{Path, PathBuf};

/// Convenience trail of module sources.
///
/// Backups of the same file on the same day overwrite each other.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn bucket_for(&self, day: NaiveDate) -> PathBuf {
        self.root.join(day.format("%Y-%m-%d").to_string())
    }

    /// Copy `path` into today's bucket, returning the backup path
    pub async fn snapshot(&self, path: &Path) -> io::Result<PathBuf> {
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no file name in {}", path.display()),
            )
        })?;

        let bucket = self.bucket_for(Local::now().date_naive());
        tokio::fs::create_dir_all(&bucket).await?;

        let target = bucket.join(file_name);
        tokio::fs::copy(path, &target).await?;
        tracing::debug!("Backed up {} to {}", path.display(), target.display());
        Ok(target)
    }
}

//! Shadow copies of native plugin libraries
//!
//! The dynamic loader caches libraries by path, so a rebuilt library at the
//! same path would not be picked up on reload. Every load opens a fresh copy
//! named `<module>@<uuid>.<ext>` instead, and stale copies are invalidated.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ModuleCache {
    dir: PathBuf,
}

fn owner_of(file_name: &str) -> Option<&str> {
    file_name.split_once('@').map(|(module, _)| module)
}

impl ModuleCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `source` to a unique path for `module`
    pub async fn shadow(&self, module: &str, source: &Path) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{module}@{id}.{ext}"),
            None => format!("{module}@{id}"),
        };
        let target = self.dir.join(name);
        tokio::fs::copy(source, &target).await?;
        Ok(target)
    }

    /// Remove every cached copy for `module`, returning how many were removed
    pub async fn invalidate(&self, module: &str) -> io::Result<usize> {
        self.remove_where(|owner| owner == module).await
    }

    /// Remove cached copies of every module not in `keep`
    pub async fn clean(&self, keep: &[String]) -> io::Result<usize> {
        self.remove_where(|owner| !keep.iter().any(|k| k == owner)).await
    }

    async fn remove_where(&self, matches: impl Fn(&str) -> bool) -> io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(owner) = file_name.to_str().and_then(owner_of) else {
                continue;
            };
            if matches(owner) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shadow_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("libecho.so");
        tokio::fs::write(&source, b"lib").await.unwrap();

        let cache = ModuleCache::new(dir.path().join("cache"));
        let first = cache.shadow("echo", &source).await.unwrap();
        let second = cache.shadow("echo", &source).await.unwrap();
        cache.shadow("echo_two", &source).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(first.extension().unwrap(), "so");
        assert_eq!(cache.invalidate("echo").await.unwrap(), 2);
        assert!(!first.exists());
        assert_eq!(cache.clean(&[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clean_keeps_loaded_modules() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("x.so");
        tokio::fs::write(&source, b"lib").await.unwrap();

        let cache = ModuleCache::new(dir.path().join("cache"));
        let kept = cache.shadow("alive", &source).await.unwrap();
        cache.shadow("dead", &source).await.unwrap();

        assert_eq!(cache.clean(&["alive".to_string()]).await.unwrap(), 1);
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let cache = ModuleCache::new("/nonexistent/cache/dir");
        assert_eq!(cache.invalidate("x").await.unwrap(), 0);
    }
}

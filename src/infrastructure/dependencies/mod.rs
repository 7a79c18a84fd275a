//! Dependency installation for plugins that declare `requires:` or `system_requires:`

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::application::errors::DependencyError;
use crate::infrastructure::config::DependencyConfig;
use crate::infrastructure::plugins::PluginManifest;

/// Installs a plugin's declared packages with the host package manager
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    installer: Vec<String>,
    system_installer: Vec<String>,
    timeout: Option<Duration>,
}

impl DependencyResolver {
    pub fn new(installer: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            installer,
            system_installer: Vec::new(),
            timeout,
        }
    }

    /// Installer used for `system_requires:` packages
    pub fn with_system_installer(mut self, installer: Vec<String>) -> Self {
        self.system_installer = installer;
        self
    }

    pub fn from_config(config: &DependencyConfig) -> Self {
        Self::new(
            config.installer.clone(),
            config.timeout_secs.map(Duration::from_secs),
        )
        .with_system_installer(config.system_installer.clone())
    }

    /// Install everything `source` requires: system packages first, then the
    /// regular ones, each set in a single installer run.
    ///
    /// Returns the installed package names; an absent header is a no-op.
    pub async fn resolve(&self, source: &str) -> Result<Vec<String>, DependencyError> {
        let manifest = PluginManifest::parse(source);

        let mut installed = self
            .install(&self.system_installer, &manifest.system_requires, "system")
            .await?;
        installed.extend(self.install(&self.installer, &manifest.requires, "package").await?);
        Ok(installed)
    }

    async fn install(
        &self,
        installer: &[String],
        packages: &[String],
        kind: &str,
    ) -> Result<Vec<String>, DependencyError> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }

        let Some((program, args)) = installer.split_first() else {
            return Err(DependencyError::NoInstaller(packages.join(", ")));
        };

        tracing::info!("Installing {} dependencies: {}", kind, packages.join(", "));

        let child = Command::new(program)
            .args(args)
            .args(packages)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DependencyError::Spawn(format!("{}: {}", program, e)))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| DependencyError::Timeout(limit.as_secs()))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| DependencyError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!("{} dependency installation failed: {}", kind, stderr);
            return Err(DependencyError::InstallFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        tracing::info!("Installed {} dependencies: {}", kind, packages.join(", "));
        Ok(packages.to_vec())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "installer".into()]
    }

    #[tokio::test]
    async fn test_no_header_skips_installer() {
        let resolver = DependencyResolver::new(vec!["false".into()], None);
        assert_eq!(resolver.resolve("echo hi\n").await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_all_packages_in_one_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let script = format!("echo \"$@\" >> {}", log.display());
        let resolver = DependencyResolver::new(sh(&script), None);

        let installed = resolver.resolve("# requires: alpha, beta\n").await.unwrap();
        assert_eq!(installed, vec!["alpha", "beta"]);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "alpha beta\n");
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let resolver = DependencyResolver::new(sh("echo 'no such package' >&2; exit 3"), None);
        match resolver.resolve("# requires: fakepkg12345\n").await {
            Err(DependencyError::InstallFailed { stderr, .. }) => {
                assert_eq!(stderr, "no such package");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_installer_binary() {
        let resolver = DependencyResolver::new(vec!["/nonexistent/installer".into()], None);
        assert!(matches!(
            resolver.resolve("# requires: x\n").await,
            Err(DependencyError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let resolver = DependencyResolver::new(sh("sleep 5"), Some(Duration::from_millis(100)));
        assert!(matches!(
            resolver.resolve("# requires: slow\n").await,
            Err(DependencyError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_system_packages_install_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let record = |tag: &str| sh(&format!("echo {} \"$@\" >> {}", tag, log.display()));
        let resolver = DependencyResolver::new(record("pkg"), None)
            .with_system_installer(record("sys"));

        let installed = resolver
            .resolve("# requires: pydub\n# system_requires: ffmpeg\n")
            .await
            .unwrap();
        assert_eq!(installed, vec!["ffmpeg", "pydub"]);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "sys ffmpeg\npkg pydub\n");
    }

    #[tokio::test]
    async fn test_system_packages_need_an_installer() {
        let resolver = DependencyResolver::new(sh("exit 0"), None);
        assert!(matches!(
            resolver.resolve("# system_requires: ffmpeg\n").await,
            Err(DependencyError::NoInstaller(_))
        ));
    }
}

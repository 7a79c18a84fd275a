//! Out-of-process plugins: a child process speaking JSON lines on stdio

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::loader::PluginHost;
use super::protocol::{self, HostRequest, PluginResponse};
use crate::application::errors::PluginError;

/// How long a worker gets to exit on its own after stdin is closed
const EXIT_GRACE: Duration = Duration::from_secs(2);

struct WorkerIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// A plugin running as `<interpreter...> <source file>`
pub struct WorkerHost {
    name: String,
    io: Mutex<Option<WorkerIo>>,
}

impl WorkerHost {
    pub fn spawn(name: &str, interpreter: &[String], path: &Path) -> Result<Self, PluginError> {
        let (program, args) = interpreter.split_first().ok_or_else(|| {
            PluginError::Unsupported(format!("no interpreter for {}", path.display()))
        })?;

        let mut child = Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PluginError::Spawn(format!("{} {}: {}", program, path.display(), e)))?;

        let stdin = child.stdin.take().ok_or(PluginError::Closed)?;
        let stdout = child.stdout.take().ok_or(PluginError::Closed)?;

        // Anything a plugin prints outside the protocol ends up in the log
        if let Some(stderr) = child.stderr.take() {
            let module = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(module = %module, "{}", line);
                }
            });
        }

        tracing::debug!("Started worker for {} (pid {:?})", name, child.id());

        Ok(Self {
            name: name.to_string(),
            io: Mutex::new(Some(WorkerIo {
                child,
                stdin,
                stdout: BufReader::new(stdout),
            })),
        })
    }
}

#[async_trait]
impl PluginHost for WorkerHost {
    async fn call(&self, request: &HostRequest) -> Result<PluginResponse, PluginError> {
        let mut line = protocol::encode(request)?;
        line.push('\n');

        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(PluginError::Closed)?;

        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.flush().await?;

        let mut response = String::new();
        if io.stdout.read_line(&mut response).await? == 0 {
            return Err(PluginError::Closed);
        }
        protocol::decode(&response)
    }

    async fn shutdown(&self) {
        let Some(io) = self.io.lock().await.take() else {
            return;
        };
        let WorkerIo { mut child, stdin, stdout } = io;
        drop(stdin);
        drop(stdout);

        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("Worker for {} exited: {}", self.name, status),
            Ok(Err(e)) => tracing::warn!("Failed to wait for worker {}: {}", self.name, e),
            Err(_) => {
                tracing::warn!("Worker for {} did not exit, killing it", self.name);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill worker {}: {}", self.name, e);
                }
            }
        }
    }

    fn kind(&self) -> &'static str {
        "worker"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh() -> Vec<String> {
        vec!["sh".to_string()]
    }

    async fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("plugin.sh");
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_round_trip_over_stdio() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            dir.path(),
            "while read -r line; do printf '%s\\n' '{\"type\":\"unloaded\"}'; done\n",
        )
        .await;

        let host = WorkerHost::spawn("t", &sh(), &path).unwrap();
        assert_eq!(host.call(&HostRequest::Unload).await.unwrap(), PluginResponse::Unloaded);
        assert_eq!(host.call(&HostRequest::Unload).await.unwrap(), PluginResponse::Unloaded);
        host.shutdown().await;
        assert!(matches!(host.call(&HostRequest::Unload).await, Err(PluginError::Closed)));
    }

    #[tokio::test]
    async fn test_exit_without_answer_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "exit 0\n").await;

        let host = WorkerHost::spawn("t", &sh(), &path).unwrap();
        let result = host.call(&HostRequest::Unload).await;
        assert!(matches!(result, Err(PluginError::Closed) | Err(PluginError::Io(_))));
    }

    #[tokio::test]
    async fn test_garbage_output_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "read -r line; echo hello\nsleep 1\n").await;

        let host = WorkerHost::spawn("t", &sh(), &path).unwrap();
        assert!(matches!(
            host.call(&HostRequest::Unload).await,
            Err(PluginError::Protocol(_))
        ));
        host.shutdown().await;
    }

    #[test]
    fn test_empty_interpreter_is_unsupported() {
        let result = WorkerHost::spawn("t", &[], Path::new("x.sh"));
        assert!(matches!(result, Err(PluginError::Unsupported(_))));
    }
}

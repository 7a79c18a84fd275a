//! Restart controller - graceful stop, re-exec, and the announcement after it

use std::collections::BTreeMap;
use tokio::sync::watch;

use super::module_manager::ModuleManager;
use crate::application::errors::{StorageError, TransportError};
use crate::domain::entities::{MessageRef, RestartKind, RestartStatus};
use crate::domain::traits::Transport;
use crate::infrastructure::config::Paths;
use crate::infrastructure::storage::StateStore;

/// Why the main loop was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Stop, then re-exec the process with the same arguments
    Restart(RestartKind),
    /// Stop and exit
    Exit,
}

pub struct RestartController {
    state: StateStore,
    owner_id: String,
    shutdown: watch::Sender<Option<ShutdownReason>>,
}

impl RestartController {
    pub fn new(paths: &Paths, owner_id: impl Into<String>) -> Self {
        let (shutdown, _) = watch::channel(None);
        Self {
            state: StateStore::new(paths),
            owner_id: owner_id.into(),
            shutdown,
        }
    }

    /// Receiver that changes once a shutdown is requested
    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownReason>> {
        self.shutdown.subscribe()
    }

    pub fn requested(&self) -> Option<ShutdownReason> {
        *self.shutdown.borrow()
    }

    pub fn request_exit(&self) {
        self.shutdown.send_replace(Some(ShutdownReason::Exit));
    }

    /// Persist the restart record and the loaded modules, then ask the main
    /// loop to stop. `target` is the message to edit once the new process is up.
    pub async fn prepare_restart(
        &self,
        kind: RestartKind,
        target: Option<MessageRef>,
        extra: BTreeMap<String, String>,
        modules: &ModuleManager,
    ) -> Result<RestartStatus, StorageError> {
        let mut status = RestartStatus::new(kind, target);
        status.extra = extra;

        self.state.save_restart_status(&status).await?;
        modules.save_loaded_state().await?;

        tracing::info!(kind = ?kind, "Restart requested");
        self.shutdown.send_replace(Some(ShutdownReason::Restart(kind)));
        Ok(status)
    }

    /// Read and delete the record left by the previous process
    pub async fn consume_pending_status(&self) -> Option<RestartStatus> {
        match self.state.take_restart_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("Discarding restart status: {}", e);
                None
            }
        }
    }

    /// Tell the operator the restart finished: edit the recorded message, or
    /// message the owner when it is gone or none was recorded.
    pub async fn announce(
        &self,
        transport: &dyn Transport,
        status: &RestartStatus,
    ) -> Result<MessageRef, TransportError> {
        let text = status.confirmation_text();

        if let Some(target) = status.target() {
            match transport
                .edit_message(&target.chat_id, &target.message_id, &text)
                .await
            {
                Ok(()) => return Ok(target),
                Err(TransportError::NotFound(e)) => {
                    tracing::debug!("Restart message is gone ({}), messaging the owner", e);
                }
                Err(e) => return Err(e),
            }
        }

        transport.send_message(&self.owner_id, &text).await
    }
}

/// Replace the current process with a fresh copy of itself.
///
/// Only returns on failure.
pub fn reexec_current_process() -> std::io::Error {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return e,
    };
    let mut command = std::process::Command::new(exe);
    command.args(std::env::args_os().skip(1));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.exec()
    }

    #[cfg(not(unix))]
    {
        match command.spawn() {
            Ok(_) => std::process::exit(0),
            Err(e) => e,
        }
    }
}

//! Runtime context - owns every service and drives the message loop

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinSet;

use super::errors::{BotError, StorageError};
use super::routing::CommandRouter;
use super::services::core_commands::register_core_commands;
use super::services::module_manager::{LoadSummary, ModuleManager};
use super::services::restart::{RestartController, ShutdownReason};
use crate::domain::traits::Transport;
use crate::infrastructure::config::{Config, Paths};
use crate::infrastructure::repository::ModuleRepository;
use crate::infrastructure::storage::StateStore;

pub struct App {
    pub config: Config,
    pub paths: Paths,
    pub transport: Arc<dyn Transport>,
    pub router: Arc<CommandRouter>,
    pub modules: ModuleManager,
    pub restart: RestartController,
    pub state: StateStore,
    pub repository: ModuleRepository,
    pub started_at: DateTime<Utc>,
}

impl App {
    /// Connect the transport, read the prefix and register the core commands.
    ///
    /// Fails when the state directory cannot be created or the transport
    /// cannot authenticate.
    pub async fn bootstrap(
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, BotError> {
        let paths = config.paths();
        paths.ensure().map_err(StorageError::from)?;

        transport.start().await?;
        let owner = match &config.bot.owner_id {
            Some(owner) => owner.clone(),
            None => transport.self_identity().await?,
        };

        let state = StateStore::new(&paths);
        let prefix = state.read_prefix().await;
        tracing::info!(
            prefix = %prefix,
            owner = %owner,
            transport = transport.name(),
            "Bootstrapping"
        );

        let router = Arc::new(CommandRouter::new(prefix, owner.clone(), transport.clone()));
        let modules = ModuleManager::new(&config, &paths, router.clone());
        let restart = RestartController::new(&paths, owner);
        let repository = ModuleRepository::new(&config.repository);

        let app = Arc::new(Self {
            config,
            paths,
            transport,
            router,
            modules,
            restart,
            state,
            repository,
            started_at: Utc::now(),
        });
        register_core_commands(&app);
        Ok(app)
    }

    /// Load modules and report a finished restart, if there was one
    pub async fn start(&self) -> LoadSummary {
        let summary = self.modules.load_all().await;
        for (name, error) in &summary.failed {
            tracing::warn!(module = %name, "Not loaded: {}", error);
        }

        if let Some(status) = self.restart.consume_pending_status().await {
            if let Err(e) = self.restart.announce(self.transport.as_ref(), &status).await {
                tracing::warn!("Could not announce restart: {}", e);
            }
        }
        summary
    }

    /// Minutes since this process started
    pub fn uptime_minutes(&self) -> i64 {
        (Utc::now() - self.started_at).num_minutes()
    }

    /// Dispatch messages until the transport disconnects or a shutdown is
    /// requested, then unload every module.
    ///
    /// Commands run concurrently; all of them finish before modules go away.
    pub async fn run(self: &Arc<Self>) -> Result<Option<ShutdownReason>, BotError> {
        let mut shutdown = self.restart.subscribe();
        let mut tasks = JoinSet::new();

        let result = loop {
            if shutdown.borrow().is_some() {
                break Ok(());
            }

            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                message = self.transport.next_message() => match message {
                    Ok(Some(message)) => {
                        let app = self.clone();
                        tasks.spawn(async move {
                            app.router.dispatch(message).await;
                        });
                    }
                    Ok(None) => {
                        tracing::info!("Transport disconnected");
                        break Ok(());
                    }
                    Err(e) => {
                        tracing::error!("Transport failed: {}", e);
                        break Err(BotError::from(e));
                    }
                },
            }
        };

        while tasks.join_next().await.is_some() {}

        let reason = self.restart.requested();
        tracing::info!(reason = ?reason, "Stopping, unloading modules");
        self.modules.shutdown().await;
        result.map(|()| reason)
    }
}

//! Engine composition root
//!
//! Builds the store and every component around it, restores the persisted
//! model and starts the background tasks.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ph_core::config::EngineConfig;
use ph_core::Snapshot;

use crate::commands::CommandInterface;
use crate::health::HealthMonitor;
use crate::notify::NotificationDispatcher;
use crate::registry::ServiceRegistry;
use crate::repository::{ModelPersister, ModelRepository};
use crate::session::{OrchestratorClient, OrchestratorSession};
use crate::store::StateStore;

pub struct Engine {
    config: EngineConfig,
    store: Arc<StateStore>,
    notifier: NotificationDispatcher,
    session: Arc<OrchestratorSession>,
    registry: Arc<ServiceRegistry>,
    persister: Arc<ModelPersister>,
    commands: CommandInterface,
    /// Stops the background tasks
    tasks_cancel: CancellationToken,
    /// Cancelled once a shutdown command was accepted
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Restore the persisted model and start the engine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: EngineConfig,
        client: Arc<dyn OrchestratorClient>,
        repository: Arc<dyn ModelRepository>,
    ) -> Self {
        let loaded = match repository.load() {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!("Ignoring unreadable persisted model: {}", e);
                None
            }
        };
        let reconnect = loaded.as_ref().is_some_and(|m| m.was_enrolled)
            && config.session.reconnect_on_start;
        let initial = loaded
            .clone()
            .map(|m| m.into_snapshot())
            .unwrap_or_default();
        tracing::info!(
            services = initial.local_services.len(),
            groups = initial.groups.len(),
            "Engine starting"
        );

        let store = Arc::new(StateStore::new(initial));
        let notifier = NotificationDispatcher::new();
        let registry = Arc::new(ServiceRegistry::new(
            Arc::clone(&store),
            notifier.clone(),
            config.inlets.clone(),
        ));
        let session = Arc::new(OrchestratorSession::new(
            Arc::clone(&store),
            client,
            notifier.clone(),
            config.session.clone(),
        ));
        let persister = Arc::new(ModelPersister::new(Arc::clone(&store), repository, loaded));
        let shutdown = CancellationToken::new();
        let commands = CommandInterface::new(
            Arc::clone(&session),
            Arc::clone(&registry),
            Arc::clone(&persister),
            shutdown.clone(),
        );

        let tasks_cancel = CancellationToken::new();
        let mut tasks = vec![Arc::clone(&persister).spawn(tasks_cancel.clone())];
        if config.health.enabled {
            let monitor = HealthMonitor::new(Arc::clone(&store), Arc::clone(&registry), &config.health);
            tasks.push(monitor.spawn_monitor(tasks_cancel.clone()));
        }

        if reconnect {
            tracing::info!("Previously enrolled, reconnecting");
            session.enroll();
        }

        Self {
            config,
            store,
            notifier,
            session,
            registry,
            persister,
            commands,
            tasks_cancel,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Latest committed snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.current()
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    pub fn session(&self) -> &Arc<OrchestratorSession> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn commands(&self) -> &CommandInterface {
        &self.commands
    }

    /// Token cancelled when a shutdown command is accepted
    pub fn shutdown_requested(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background work and write the model one last time
    pub async fn shutdown(&self) {
        self.session.shutdown();
        self.tasks_cancel.cancel();
        self.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }

        match self.persister.flush() {
            Ok(true) => tracing::info!("Model flushed"),
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to persist model: {}", e),
        }
        tracing::info!("Engine stopped");
    }
}

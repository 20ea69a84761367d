//! Command interface
//!
//! The boundary for user commands. Each command is validated and either
//! applied to the registry right away or handed to the orchestrator session,
//! whose progress shows up in the snapshot stream.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ph_core::{EngineError, Invitee};

use crate::registry::ServiceRegistry;
use crate::repository::ModelPersister;
use crate::session::OrchestratorSession;

/// A user command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enroll,
    CreateService {
        name: String,
        address: String,
        port: u16,
        scheme: Option<String>,
    },
    ModifyService {
        name: String,
        address: String,
        port: u16,
        scheme: Option<String>,
    },
    DeleteService {
        name: String,
    },
    InviteToService {
        name: String,
        email: String,
    },
    AcceptInvite {
        email: String,
        invite_id: String,
    },
    RejectInvite {
        email: String,
        invite_id: String,
    },
    Reset,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Enroll => "enroll",
            Command::CreateService { .. } => "create_service",
            Command::ModifyService { .. } => "modify_service",
            Command::DeleteService { .. } => "delete_service",
            Command::InviteToService { .. } => "invite_to_service",
            Command::AcceptInvite { .. } => "accept_invite",
            Command::RejectInvite { .. } => "reject_invite",
            Command::Reset => "reset",
            Command::Shutdown => "shutdown",
        }
    }
}

pub struct CommandInterface {
    session: Arc<OrchestratorSession>,
    registry: Arc<ServiceRegistry>,
    persister: Arc<ModelPersister>,
    shutdown: CancellationToken,
}

impl CommandInterface {
    pub fn new(
        session: Arc<OrchestratorSession>,
        registry: Arc<ServiceRegistry>,
        persister: Arc<ModelPersister>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            registry,
            persister,
            shutdown,
        }
    }

    /// Validate and apply a command. Validation failures leave the state untouched.
    pub fn submit(&self, command: Command) -> Result<(), EngineError> {
        tracing::debug!("Command: {}", command.name());

        match command {
            Command::Enroll => self.session.enroll(),
            Command::CreateService {
                name,
                address,
                port,
                scheme,
            } => {
                self.registry
                    .create_local_service(&name, &address, port, scheme)?;
            }
            Command::ModifyService {
                name,
                address,
                port,
                scheme,
            } => {
                self.registry
                    .modify_local_service(&name, &address, port, scheme)?;
            }
            Command::DeleteService { name } => self.registry.delete_local_service(&name)?,
            Command::InviteToService { name, email } => {
                self.registry.share_service(&name, Invitee::new(email))?
            }
            Command::AcceptInvite { email, invite_id } => {
                self.registry.accept_invite(&email, &invite_id)?;
            }
            Command::RejectInvite { email, invite_id } => {
                self.registry.reject_invite(&email, &invite_id)?
            }
            Command::Reset => self.reset(),
            Command::Shutdown => self.shutdown(),
        }
        Ok(())
    }

    /// Disconnect, drop every service and group, and wipe the persisted model
    pub fn reset(&self) {
        tracing::info!("Resetting engine state");
        self.session.reset();
        self.registry.clear();
        if let Err(e) = self.persister.wipe() {
            tracing::error!("Failed to wipe persisted model: {}", e);
        }
    }

    /// Flush the model and ask the engine to stop
    pub fn shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.session.shutdown();
        if let Err(e) = self.persister.flush() {
            tracing::error!("Failed to persist model on shutdown: {}", e);
        }
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationDispatcher;
    use crate::repository::{InMemoryModelRepository, PersistedModel};
    use crate::session::SimulatedOrchestrator;
    use crate::store::StateStore;
    use ph_core::config::{InletConfig, SessionConfig, SimulatedOrchestratorConfig};
    use ph_core::{Invite, OrchestratorStatus};
    use std::time::Duration;

    struct Fixture {
        store: Arc<StateStore>,
        registry: Arc<ServiceRegistry>,
        repo: Arc<InMemoryModelRepository>,
        shutdown: CancellationToken,
        commands: CommandInterface,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(StateStore::default());
        let notifier = NotificationDispatcher::new();
        let registry = Arc::new(ServiceRegistry::new(
            Arc::clone(&store),
            notifier.clone(),
            InletConfig::default(),
        ));
        let client = SimulatedOrchestrator::new(SimulatedOrchestratorConfig {
            step_delay: Duration::from_millis(10),
            ..Default::default()
        });
        let session = Arc::new(OrchestratorSession::new(
            Arc::clone(&store),
            Arc::new(client),
            notifier,
            SessionConfig::default(),
        ));
        let repo = Arc::new(InMemoryModelRepository::with_model(PersistedModel {
            was_enrolled: true,
            ..Default::default()
        }));
        let persister = Arc::new(ModelPersister::new(Arc::clone(&store), repo.clone(), repo.model()));
        let shutdown = CancellationToken::new();
        let commands = CommandInterface::new(session, Arc::clone(&registry), persister, shutdown.clone());

        Fixture {
            store,
            registry,
            repo,
            shutdown,
            commands,
        }
    }

    fn create(name: &str, port: u16) -> Command {
        Command::CreateService {
            name: name.into(),
            address: "127.0.0.1".into(),
            port,
            scheme: None,
        }
    }

    #[tokio::test]
    async fn test_registry_commands() {
        let f = fixture();

        f.commands.submit(create("web", 8080)).unwrap();
        f.commands
            .submit(Command::InviteToService {
                name: "web".into(),
                email: "a@x.com".into(),
            })
            .unwrap();
        f.commands
            .submit(Command::ModifyService {
                name: "web".into(),
                address: "127.0.0.1".into(),
                port: 8081,
                scheme: Some("http".into()),
            })
            .unwrap();

        let snapshot = f.store.current();
        let web = snapshot.local_service("web").unwrap();
        assert_eq!(web.port, 8081);
        assert!(web.is_shared_with("a@x.com"));

        let err = f.commands.submit(create("web", 9090)).unwrap_err();
        assert_eq!(err, EngineError::DuplicateName("web".into()));

        f.commands
            .submit(Command::DeleteService { name: "web".into() })
            .unwrap();
        assert!(f.store.current().local_services.is_empty());
    }

    #[tokio::test]
    async fn test_invite_commands() {
        let f = fixture();
        for id in ["i1", "i2"] {
            f.registry
                .record_invite(
                    "bob@x.com",
                    Invite {
                        id: id.into(),
                        service_name: "db".into(),
                        service_scheme: None,
                    },
                )
                .unwrap();
        }

        f.commands
            .submit(Command::AcceptInvite {
                email: "bob@x.com".into(),
                invite_id: "i1".into(),
            })
            .unwrap();
        f.commands
            .submit(Command::RejectInvite {
                email: "bob@x.com".into(),
                invite_id: "i2".into(),
            })
            .unwrap();

        let snapshot = f.store.current();
        let group = snapshot.group("bob@x.com").unwrap();
        assert!(group.invites.is_empty());
        assert_eq!(group.incoming_services.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_wipes_everything() {
        let f = fixture();
        f.commands.submit(create("web", 8080)).unwrap();
        f.commands.submit(Command::Enroll).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.store.current().enrolled());

        f.commands.submit(Command::Reset).unwrap();

        let snapshot = f.store.current();
        assert_eq!(snapshot.orchestrator_status, OrchestratorStatus::Disconnected);
        assert!(!snapshot.enrolled());
        assert!(snapshot.local_services.is_empty());
        assert!(f.repo.model().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_signals() {
        let f = fixture();
        f.commands.submit(create("web", 8080)).unwrap();

        f.commands.submit(Command::Shutdown).unwrap();

        assert!(f.shutdown.is_cancelled());
        assert_eq!(f.repo.model().unwrap().local_services.len(), 1);
    }
}

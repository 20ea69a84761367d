//! Engine end-to-end tests
//!
//! Drive the composed engine through its command interface and check the
//! snapshot stream, persistence and notifications.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use ph_core::config::{EngineConfig, HealthConfig, SimulatedOrchestratorConfig};
use ph_core::{
    Invite, Invitee, LocalService, NotificationKind, OrchestratorStatus, Snapshot,
};
use ph_engine::repository::{
    FileModelRepository, InMemoryModelRepository, ModelRepository, PersistedModel,
};
use ph_engine::session::SimulatedOrchestrator;
use ph_engine::{Command, Engine};

const STEP: Duration = Duration::from_millis(100);

fn config() -> EngineConfig {
    EngineConfig {
        health: HealthConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn client() -> Arc<SimulatedOrchestrator> {
    Arc::new(SimulatedOrchestrator::new(SimulatedOrchestratorConfig {
        step_delay: STEP,
        ..Default::default()
    }))
}

fn web(available: bool) -> LocalService {
    LocalService {
        name: "web".into(),
        address: "127.0.0.1".into(),
        port: 8080,
        scheme: Some("http".into()),
        shared_with: vec![Invitee::new("a@x.com")],
        available,
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
async fn test_subscribe_yields_current_snapshot() {
    let engine = Engine::start(config(), client(), Arc::new(InMemoryModelRepository::new()));
    engine.commands().submit(create("web", 8080)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::<Arc<Snapshot>>::new()));
    let sink = Arc::clone(&seen);
    engine.store().subscribe(move |s| sink.lock().push(s));

    assert_eq!(seen.lock().len(), 1);
    assert_eq!(*seen.lock()[0], *engine.snapshot());
}

#[tokio::test]
async fn test_registry_sequences_never_duplicate() {
    let engine = Engine::start(config(), client(), Arc::new(InMemoryModelRepository::new()));
    let commands = engine.commands();

    let seen = Arc::new(Mutex::new(Vec::<Arc<Snapshot>>::new()));
    let sink = Arc::clone(&seen);
    engine.store().subscribe(move |s| sink.lock().push(s));

    let _ = commands.submit(create("web", 8080));
    let _ = commands.submit(create("web", 9090));
    let _ = commands.submit(create("db", 5432));
    let _ = commands.submit(Command::DeleteService { name: "web".into() });
    let _ = commands.submit(create("web", 8081));
    for (email, id) in [("bob@x.com", "i1"), ("bob@x.com", "i1"), ("carol@x.com", "i1")] {
        let _ = engine.registry().record_invite(
            email,
            Invite {
                id: id.into(),
                service_name: "db".into(),
                service_scheme: None,
            },
        );
    }

    for snapshot in seen.lock().iter() {
        let mut names: Vec<_> = snapshot.local_services.iter().map(|s| &s.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), snapshot.local_services.len());

        let mut emails: Vec<_> = snapshot.groups.iter().map(|g| &g.email).collect();
        emails.sort();
        emails.dedup();
        assert_eq!(emails.len(), snapshot.groups.len());
    }
    assert_eq!(engine.snapshot().groups.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_from_every_state_clears_enrollment() {
    for steps in 0..=5u32 {
        let engine = Engine::start(config(), client(), Arc::new(InMemoryModelRepository::new()));
        engine.commands().submit(Command::Enroll).unwrap();
        tokio::time::sleep(STEP * steps + STEP / 2).await;

        engine.commands().submit(Command::Reset).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.orchestrator_status, OrchestratorStatus::Disconnected);
        assert!(!snapshot.enrolled());
        assert!(snapshot.enrollment.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_connected_only_after_every_step() {
    let engine = Engine::start(config(), client(), Arc::new(InMemoryModelRepository::new()));
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    engine.store().subscribe(move |s| sink.lock().push(s.orchestrator_status));

    engine.commands().submit(Command::Enroll).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let statuses = statuses.lock();
    let connected = statuses
        .iter()
        .position(|s| *s == OrchestratorStatus::Connected)
        .unwrap();
    assert_eq!(
        statuses[connected - 3..connected],
        [
            OrchestratorStatus::WaitingForToken,
            OrchestratorStatus::RetrievingSpace,
            OrchestratorStatus::RetrievingProject
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_restores_model_and_reconnects() {
    let repo = Arc::new(InMemoryModelRepository::with_model(PersistedModel {
        was_enrolled: true,
        local_services: vec![web(true)],
        groups: vec![],
    }));

    let engine = Engine::start(config(), client(), repo.clone());

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.local_services, vec![web(false)]);
    assert_eq!(snapshot.orchestrator_status, OrchestratorStatus::Connecting);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(engine.snapshot().enrolled());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_on_start_can_be_disabled() {
    let repo = Arc::new(InMemoryModelRepository::with_model(PersistedModel {
        was_enrolled: true,
        ..Default::default()
    }));
    let mut config = config();
    config.session.reconnect_on_start = false;

    let engine = Engine::start(config, client(), repo);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(engine.snapshot().orchestrator_status, OrchestratorStatus::Disconnected);
}

#[tokio::test]
async fn test_shutdown_flushes_model_to_disk() {
    let dir = TempDir::new().unwrap();
    let mut config = config();
    config.data_dir = dir.path().to_path_buf();
    let path = config.model_path();

    let engine = Engine::start(config, client(), Arc::new(FileModelRepository::new(&path)));
    engine.commands().submit(create("web", 8080)).unwrap();
    engine.shutdown().await;

    let model = FileModelRepository::new(&path).load().unwrap().unwrap();
    assert_eq!(model.local_services.len(), 1);
    assert!(!model.was_enrolled);
}

#[tokio::test]
async fn test_unreadable_model_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.json");
    std::fs::write(&path, "{").unwrap();

    let engine = Engine::start(config(), client(), Arc::new(FileModelRepository::new(&path)));

    assert_eq!(*engine.snapshot(), Snapshot::default());
}

#[tokio::test]
async fn test_invite_notifications() {
    let engine = Engine::start(config(), client(), Arc::new(InMemoryModelRepository::new()));
    let mut rx = engine.notifier().subscribe();

    engine
        .registry()
        .record_invite(
            "bob@x.com",
            Invite {
                id: "i1".into(),
                service_name: "db".into(),
                service_scheme: Some("tcp".into()),
            },
        )
        .unwrap();
    engine
        .commands()
        .submit(Command::AcceptInvite {
            email: "bob@x.com".into(),
            invite_id: "i1".into(),
        })
        .unwrap();

    let recorded = rx.recv().await.unwrap();
    let accepted = rx.recv().await.unwrap();
    assert_eq!(recorded.kind, NotificationKind::Information);
    assert!(accepted.message.contains("db"));

    let snapshot = engine.snapshot();
    let service = &snapshot.group("bob@x.com").unwrap().incoming_services[0];
    assert_eq!(service.source_name, "db");
    assert_eq!(service.scheme.as_deref(), Some("tcp"));
    assert!(!service.available);
}

//! Model persistence
//!
//! The durable part of the snapshot (services, groups and whether the user
//! was enrolled) is written by a background persister that observes the
//! store, so writes never sit on the update path.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use ph_core::{LocalService, ServiceGroup, Snapshot};

use crate::store::StateStore;

/// Errors from a model repository
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Model encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What survives a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedModel {
    pub was_enrolled: bool,
    #[serde(default)]
    pub local_services: Vec<LocalService>,
    #[serde(default)]
    pub groups: Vec<ServiceGroup>,
}

impl PersistedModel {
    /// Build the model for `snapshot`.
    ///
    /// `was_enrolled` stays set while a session is still being re-established,
    /// so a restart in the middle of a reconnect tries again.
    pub fn from_snapshot(snapshot: &Snapshot, previous: Option<&PersistedModel>) -> Self {
        let reconnecting =
            snapshot.orchestrator_status.is_active() && previous.is_some_and(|p| p.was_enrolled);
        Self {
            was_enrolled: snapshot.enrolled() || reconnecting,
            local_services: snapshot.local_services.clone(),
            groups: snapshot.groups.clone(),
        }
    }

    /// Initial snapshot for a fresh process. Availability is unknown until probed.
    pub fn into_snapshot(self) -> Snapshot {
        let mut snapshot = Snapshot {
            local_services: self.local_services,
            groups: self.groups,
            ..Default::default()
        };
        for service in &mut snapshot.local_services {
            service.available = false;
        }
        for service in snapshot
            .groups
            .iter_mut()
            .flat_map(|g| g.incoming_services.iter_mut())
        {
            service.available = false;
        }
        snapshot
    }
}

/// Durable storage for the persisted model
pub trait ModelRepository: Send + Sync {
    fn load(&self) -> Result<Option<PersistedModel>, RepositoryError>;
    fn store(&self, model: &PersistedModel) -> Result<(), RepositoryError>;
    fn delete(&self) -> Result<(), RepositoryError>;
}

/// Pretty JSON in a single file, replaced atomically on every write
pub struct FileModelRepository {
    path: PathBuf,
}

impl FileModelRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelRepository for FileModelRepository {
    fn load(&self) -> Result<Option<PersistedModel>, RepositoryError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn store(&self, model: &PersistedModel) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(model)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn delete(&self) -> Result<(), RepositoryError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the model in memory; for tests and ephemeral engines
#[derive(Default)]
pub struct InMemoryModelRepository {
    model: Mutex<Option<PersistedModel>>,
    writes: Mutex<usize>,
}

impl InMemoryModelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: PersistedModel) -> Self {
        Self {
            model: Mutex::new(Some(model)),
            writes: Mutex::new(0),
        }
    }

    /// The stored model, if any
    pub fn model(&self) -> Option<PersistedModel> {
        self.model.lock().clone()
    }

    /// Number of successful `store` calls
    pub fn writes(&self) -> usize {
        *self.writes.lock()
    }
}

impl ModelRepository for InMemoryModelRepository {
    fn load(&self) -> Result<Option<PersistedModel>, RepositoryError> {
        Ok(self.model.lock().clone())
    }

    fn store(&self, model: &PersistedModel) -> Result<(), RepositoryError> {
        *self.model.lock() = Some(model.clone());
        *self.writes.lock() += 1;
        Ok(())
    }

    fn delete(&self) -> Result<(), RepositoryError> {
        *self.model.lock() = None;
        Ok(())
    }
}

/// Writes the latest model whenever the store commits
pub struct ModelPersister {
    store: Arc<StateStore>,
    repository: Arc<dyn ModelRepository>,
    /// Last model written; also serializes writers
    last: Mutex<Option<PersistedModel>>,
}

impl ModelPersister {
    pub fn new(
        store: Arc<StateStore>,
        repository: Arc<dyn ModelRepository>,
        loaded: Option<PersistedModel>,
    ) -> Self {
        Self {
            store,
            repository,
            last: Mutex::new(loaded),
        }
    }

    /// Write the current model unless it matches the last one written.
    /// Returns whether anything was written.
    pub fn flush(&self) -> Result<bool, RepositoryError> {
        let mut last = self.last.lock();
        let model = PersistedModel::from_snapshot(&self.store.current(), last.as_ref());
        if last.as_ref() == Some(&model) {
            return Ok(false);
        }
        self.repository.store(&model)?;
        tracing::debug!(
            services = model.local_services.len(),
            groups = model.groups.len(),
            "Model persisted"
        );
        *last = Some(model);
        Ok(true)
    }

    /// Delete the stored model
    pub fn wipe(&self) -> Result<(), RepositoryError> {
        let mut last = self.last.lock();
        self.repository.delete()?;
        *last = Some(PersistedModel::default());
        tracing::info!("Persisted model wiped");
        Ok(())
    }

    /// Flush after every commit until cancelled
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let dirty = Arc::new(Notify::new());
        let signal = Arc::clone(&dirty);
        let handle = self.store.subscribe(move |_| signal.notify_one());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = dirty.notified() => {
                        let persister = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || persister.flush()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::error!("Failed to persist model: {}", e),
                            Err(e) => tracing::error!("Persister task failed: {}", e),
                        }
                    }
                }
            }
            self.store.unsubscribe(handle);
            tracing::debug!("Model persister stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ph_core::{Enrollment, OrchestratorStatus, Service};
    use std::time::Duration;
    use tempfile::TempDir;

    fn web(available: bool) -> LocalService {
        LocalService {
            name: "web".into(),
            address: "127.0.0.1".into(),
            port: 8080,
            scheme: None,
            shared_with: vec![],
            available,
        }
    }

    #[test]
    fn test_into_snapshot_forces_unavailable() {
        let mut group = ServiceGroup::new("bob@x.com");
        group.incoming_services.push(Service {
            source_name: "db".into(),
            address: "127.0.0.1".into(),
            port: 15000,
            scheme: None,
            available: true,
        });
        let model = PersistedModel {
            was_enrolled: true,
            local_services: vec![web(true)],
            groups: vec![group],
        };

        let snapshot = model.into_snapshot();

        assert_eq!(snapshot.orchestrator_status, OrchestratorStatus::Disconnected);
        assert!(!snapshot.enrolled());
        assert!(!snapshot.local_services[0].available);
        assert!(!snapshot.groups[0].incoming_services[0].available);
    }

    #[test]
    fn test_was_enrolled_survives_reconnect() {
        let connecting = Snapshot {
            orchestrator_status: OrchestratorStatus::Connecting,
            ..Default::default()
        };
        let enrolled = PersistedModel {
            was_enrolled: true,
            ..Default::default()
        };

        assert!(PersistedModel::from_snapshot(&connecting, Some(&enrolled)).was_enrolled);
        assert!(!PersistedModel::from_snapshot(&connecting, None).was_enrolled);
        assert!(!PersistedModel::from_snapshot(&Snapshot::default(), Some(&enrolled)).was_enrolled);
    }

    #[test]
    fn test_file_repository_roundtrip_and_delete() {
        let dir = TempDir::new().unwrap();
        let repo = FileModelRepository::new(dir.path().join("nested").join("model.json"));

        assert!(repo.load().unwrap().is_none());

        let model = PersistedModel {
            was_enrolled: true,
            local_services: vec![web(false)],
            groups: vec![],
        };
        repo.store(&model).unwrap();
        assert_eq!(repo.load().unwrap(), Some(model));
        assert!(!repo.path().with_extension("json.tmp").exists());

        repo.delete().unwrap();
        repo.delete().unwrap();
        assert!(repo.load().unwrap().is_none());
    }

    #[test]
    fn test_file_repository_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "not json").unwrap();

        let result = FileModelRepository::new(path).load();
        assert!(matches!(result, Err(RepositoryError::Json(_))));
    }

    #[test]
    fn test_flush_skips_unchanged_model() {
        let store = Arc::new(StateStore::default());
        let repo = Arc::new(InMemoryModelRepository::new());
        let persister = ModelPersister::new(Arc::clone(&store), repo.clone(), None);

        assert!(persister.flush().unwrap());
        assert!(!persister.flush().unwrap());

        store.update(Snapshot {
            orchestrator_status: OrchestratorStatus::Connected,
            enrollment: Some(Enrollment {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                image: None,
                github_user: None,
            }),
            ..Default::default()
        });
        assert!(persister.flush().unwrap());
        assert!(repo.model().unwrap().was_enrolled);
        assert_eq!(repo.writes(), 2);
    }

    #[tokio::test]
    async fn test_background_persister_follows_store() {
        let store = Arc::new(StateStore::default());
        let repo = Arc::new(InMemoryModelRepository::new());
        let persister = Arc::new(ModelPersister::new(Arc::clone(&store), repo.clone(), None));
        let cancel = CancellationToken::new();
        let task = Arc::clone(&persister).spawn(cancel.clone());

        store.update(Snapshot {
            local_services: vec![web(false)],
            ..Default::default()
        });

        for _ in 0..100 {
            if repo.model().is_some_and(|m| m.local_services.len() == 1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repo.model().unwrap().local_services, vec![web(false)]);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_wipe_deletes_model() {
        let store = Arc::new(StateStore::default());
        let repo = Arc::new(InMemoryModelRepository::with_model(PersistedModel {
            was_enrolled: true,
            ..Default::default()
        }));
        let persister = ModelPersister::new(store, repo.clone(), repo.model());

        persister.wipe().unwrap();

        assert!(repo.model().is_none());
        assert!(!persister.flush().unwrap());
    }
}

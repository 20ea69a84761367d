//! Orchestrator session driver
//!
//! Runs the enrollment flow against an [`OrchestratorClient`], feeding each
//! completed step into the [`SessionMachine`] and committing the resulting
//! snapshot. Network calls never run under a lock; results are applied only
//! if the flow that produced them is still the live one.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use ph_core::config::SessionConfig;
use ph_core::{EngineError, Enrollment, Notification, OrchestratorError, OrchestratorStatus};

use super::client::OrchestratorClient;
use super::machine::{SessionEvent, SessionMachine, TransitionError};
use super::reconnect::ExponentialBackoff;
use crate::notify::{DisconnectCause, NotificationDispatcher};
use crate::store::{Commit, StateStore};

/// Why a flow stopped before reaching `Connected`
#[derive(Debug)]
enum FlowError {
    Cancelled,
    Stale,
    Failed(EngineError),
}

/// Why an event was not applied
#[derive(Debug)]
enum Rejected {
    Stale,
    Illegal(TransitionError),
}

/// A committed session transition
struct Applied {
    generation: u64,
    commit: Commit,
}

/// Owns the session state machine and the in-flight enrollment flow
pub struct OrchestratorSession {
    store: Arc<StateStore>,
    client: Arc<dyn OrchestratorClient>,
    notifier: NotificationDispatcher,
    config: SessionConfig,
    machine: Mutex<SessionMachine>,
    cancel: Mutex<CancellationToken>,
    backoff: Mutex<ExponentialBackoff>,
}

impl OrchestratorSession {
    pub fn new(
        store: Arc<StateStore>,
        client: Arc<dyn OrchestratorClient>,
        notifier: NotificationDispatcher,
        config: SessionConfig,
    ) -> Self {
        let backoff = ExponentialBackoff::from_config(&config.backoff);
        Self {
            store,
            client,
            notifier,
            config,
            machine: Mutex::new(SessionMachine::new()),
            cancel: Mutex::new(CancellationToken::new()),
            backoff: Mutex::new(backoff),
        }
    }

    /// Current session status
    pub fn status(&self) -> OrchestratorStatus {
        self.machine.lock().status()
    }

    /// Start enrollment. Does nothing if a session is already active.
    pub fn enroll(self: &Arc<Self>) {
        if self.status().is_active() {
            tracing::info!("Enrollment requested while {}, ignoring", self.status());
            return;
        }
        self.backoff.lock().reset();
        self.start_flow();
    }

    /// Cancel any in-flight flow or pending reconnect and go to `Disconnected`
    pub fn reset(&self) {
        self.backoff.lock().reset();
        self.disconnect(DisconnectCause::Requested);
    }

    /// Force `Disconnected` after an established session lost its connection.
    ///
    /// Schedules a reconnect when auto reconnect is enabled and the session
    /// had reached `Connected`.
    pub fn connectivity_lost(self: &Arc<Self>, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Orchestrator connectivity lost: {}", reason);

        let was_connected = self
            .disconnect(DisconnectCause::ConnectivityLost(reason))
            .map(|applied| applied.commit.previous.orchestrator_status == OrchestratorStatus::Connected)
            .unwrap_or(false);

        if was_connected && self.config.auto_reconnect {
            self.schedule_reconnect();
        }
    }

    /// Cancel in-flight work without changing state
    pub fn shutdown(&self) {
        self.cancel.lock().cancel();
    }

    fn disconnect(&self, cause: DisconnectCause) -> Option<Applied> {
        self.cancel.lock().cancel();
        self.apply(None, SessionEvent::Disconnect, None, Some(cause))
    }

    /// Install a fresh cancellation token, cancelling the previous one
    fn replace_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.cancel.lock(), token.clone());
        previous.cancel();
        token
    }

    fn start_flow(self: &Arc<Self>) {
        // A concurrent enroll may have won the race; its flow keeps its token
        let Some(applied) = self.apply(None, SessionEvent::Start, None, None) else {
            return;
        };
        let cancel = self.replace_token();
        tracing::info!("Starting enrollment");

        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.run_flow(applied.generation, cancel).await;
        });
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let delay = self.backoff.lock().next_delay();
        let cancel = self.replace_token();
        tracing::info!("Reconnecting in {:?}", delay);

        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Pending reconnect cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    session.start_flow();
                }
            }
        });
    }

    async fn run_flow(&self, generation: u64, cancel: CancellationToken) {
        match self.drive(generation, &cancel).await {
            Ok(()) => {}
            Err(FlowError::Cancelled) => tracing::debug!("Enrollment flow cancelled"),
            Err(FlowError::Stale) => tracing::debug!("Enrollment flow superseded"),
            Err(FlowError::Failed(err)) => {
                tracing::warn!("Enrollment failed: {}", err);
                self.apply(
                    Some(generation),
                    SessionEvent::Disconnect,
                    None,
                    Some(DisconnectCause::Failure(err.to_string())),
                );
            }
        }
    }

    async fn drive(&self, generation: u64, cancel: &CancellationToken) -> Result<(), FlowError> {
        let client = &self.client;

        self.step(cancel, client.connect()).await?;
        let code = self.step(cancel, client.start_device_flow()).await?;
        self.advance(generation, SessionEvent::DeviceFlowStarted, None)?;
        self.notifier.emit(Notification::information(
            "Confirm enrollment",
            format!(
                "Open {} and enter the code {}",
                code.verification_uri, code.user_code
            ),
        ));

        let token = self.step(cancel, client.wait_for_token(&code)).await?;
        self.advance(generation, SessionEvent::TokenObtained, None)?;

        let space = self.step(cancel, client.retrieve_space(&token)).await?;
        self.advance(generation, SessionEvent::SpaceResolved, None)?;
        tracing::debug!(space = %space.name, "Space resolved");

        let project = self.step(cancel, client.retrieve_project(&token, &space)).await?;
        let user = self.step(cancel, client.user_info(&token)).await?;
        self.advance(generation, SessionEvent::ProjectResolved, Some(user.into()))?;
        tracing::info!(project = %project.name, "Enrollment complete");

        Ok(())
    }

    /// Await one orchestrator call, bounded by the step timeout and the flow's cancellation
    async fn step<T>(
        &self,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, OrchestratorError>>,
    ) -> Result<T, FlowError> {
        let timeout = self.config.step_timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(FlowError::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(FlowError::Failed(err.into())),
                Err(_) => Err(FlowError::Failed(EngineError::NetworkUnavailable(format!(
                    "orchestrator did not respond within {:?}",
                    timeout
                )))),
            },
        }
    }

    fn advance(
        &self,
        generation: u64,
        event: SessionEvent,
        enrollment: Option<Enrollment>,
    ) -> Result<(), FlowError> {
        self.apply(Some(generation), event, enrollment, None)
            .map(|_| ())
            .ok_or(FlowError::Stale)
    }

    /// Advance the machine and commit the matching snapshot in one store write.
    ///
    /// With `expected` set, the event is dropped unless that generation is
    /// still live. Returns `None` if nothing was applied.
    fn apply(
        &self,
        expected: Option<u64>,
        event: SessionEvent,
        enrollment: Option<Enrollment>,
        cause: Option<DisconnectCause>,
    ) -> Option<Applied> {
        let mut generation = 0;
        let result = self.store.update_with(|current| {
            let mut machine = self.machine.lock();
            if expected.is_some_and(|g| g != machine.generation()) {
                return Err(Rejected::Stale);
            }
            let status = machine.advance(event).map_err(Rejected::Illegal)?;
            generation = machine.generation();

            let mut next = current.clone();
            next.orchestrator_status = status;
            next.enrollment = match status {
                OrchestratorStatus::Connected => enrollment,
                _ => None,
            };
            Ok(next)
        });

        match result {
            Ok(commit) => {
                if commit.changed() {
                    tracing::info!(
                        "Orchestrator status: {} -> {}",
                        commit.previous.orchestrator_status,
                        commit.current.orchestrator_status
                    );
                    self.notifier
                        .on_transition(&commit.previous, &commit.current, cause.as_ref());
                }
                Some(Applied { generation, commit })
            }
            Err(Rejected::Stale) => {
                tracing::debug!(?event, "Discarding result of a cancelled flow");
                None
            }
            Err(Rejected::Illegal(err)) => {
                tracing::debug!("{}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SimulatedOrchestrator;
    use ph_core::config::{BackoffConfig, SimulatedFailure, SimulatedOrchestratorConfig, SimulatedStep};
    use ph_core::NotificationKind;
    use std::time::Duration;
    use tokio::sync::broadcast;

    const STEP: Duration = Duration::from_millis(100);

    struct Harness {
        store: Arc<StateStore>,
        session: Arc<OrchestratorSession>,
        statuses: Arc<Mutex<Vec<OrchestratorStatus>>>,
        notifications: broadcast::Receiver<Notification>,
    }

    fn harness(fail_at: Option<SimulatedStep>, failure: SimulatedFailure, config: SessionConfig) -> Harness {
        let store = Arc::new(StateStore::default());
        let notifier = NotificationDispatcher::new();
        let notifications = notifier.subscribe();
        let client = SimulatedOrchestrator::new(SimulatedOrchestratorConfig {
            step_delay: STEP,
            fail_at,
            failure,
            user_email: "ada@example.com".into(),
            ..Default::default()
        });
        let session = Arc::new(OrchestratorSession::new(
            Arc::clone(&store),
            Arc::new(client),
            notifier,
            config,
        ));

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        store.subscribe(move |s| {
            let mut seen = sink.lock();
            if seen.last() != Some(&s.orchestrator_status) {
                seen.push(s.orchestrator_status);
            }
        });

        Harness {
            store,
            session,
            statuses,
            notifications,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_enroll_walks_every_step_in_order() {
        let mut h = harness(None, SimulatedFailure::Network, SessionConfig::default());

        h.session.enroll();
        tokio::time::sleep(Duration::from_secs(5)).await;

        use OrchestratorStatus as S;
        assert_eq!(
            *h.statuses.lock(),
            vec![
                S::Disconnected,
                S::Connecting,
                S::WaitingForToken,
                S::RetrievingSpace,
                S::RetrievingProject,
                S::Connected
            ]
        );
        let snapshot = h.store.current();
        assert!(snapshot.enrolled());
        assert_eq!(snapshot.enrollment.as_ref().unwrap().email, "ada@example.com");

        let kinds: Vec<_> = drain(&mut h.notifications).iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![NotificationKind::Information, NotificationKind::Information]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enroll_while_active_is_ignored() {
        let h = harness(None, SimulatedFailure::Network, SessionConfig::default());

        h.session.enroll();
        tokio::time::sleep(STEP / 2).await;
        h.session.enroll();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let connecting = h
            .statuses
            .lock()
            .iter()
            .filter(|s| **s == OrchestratorStatus::Connecting)
            .count();
        assert_eq!(connecting, 1);
        assert_eq!(h.session.status(), OrchestratorStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_mid_flow_discards_pending_step() {
        let mut h = harness(None, SimulatedFailure::Network, SessionConfig::default());

        h.session.enroll();
        tokio::time::sleep(STEP * 2 + STEP / 2).await;
        assert_eq!(h.session.status(), OrchestratorStatus::WaitingForToken);

        h.session.reset();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let snapshot = h.store.current();
        assert_eq!(snapshot.orchestrator_status, OrchestratorStatus::Disconnected);
        assert!(!snapshot.enrolled());
        assert_eq!(h.statuses.lock().last(), Some(&OrchestratorStatus::Disconnected));

        let last = drain(&mut h.notifications).pop().unwrap();
        assert_eq!(last.kind, NotificationKind::Warning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_when_connected_clears_enrollment() {
        let h = harness(None, SimulatedFailure::Network, SessionConfig::default());

        h.session.enroll();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.store.current().enrolled());

        h.session.reset();
        let snapshot = h.store.current();
        assert_eq!(snapshot.orchestrator_status, OrchestratorStatus::Disconnected);
        assert!(snapshot.enrollment.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_failure_forces_disconnect_with_error() {
        let mut h = harness(
            Some(SimulatedStep::Token),
            SimulatedFailure::Auth,
            SessionConfig::default(),
        );

        h.session.enroll();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.session.status(), OrchestratorStatus::Disconnected);
        assert!(!h.store.current().enrolled());

        let last = drain(&mut h.notifications).pop().unwrap();
        assert_eq!(last.kind, NotificationKind::Error);
        assert!(last.message.contains("Authentication failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flow_is_not_retried() {
        let config = SessionConfig {
            auto_reconnect: true,
            ..Default::default()
        };
        let h = harness(Some(SimulatedStep::Connect), SimulatedFailure::Network, config);

        h.session.enroll();
        tokio::time::sleep(Duration::from_secs(600)).await;

        let connecting = h
            .statuses
            .lock()
            .iter()
            .filter(|s| **s == OrchestratorStatus::Connecting)
            .count();
        assert_eq!(connecting, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_is_network_failure() {
        let config = SessionConfig {
            step_timeout: STEP / 2,
            ..Default::default()
        };
        let mut h = harness(None, SimulatedFailure::Network, config);

        h.session.enroll();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.session.status(), OrchestratorStatus::Disconnected);
        let last = drain(&mut h.notifications).pop().unwrap();
        assert!(last.message.contains("Network unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_loss_reconnects_when_enabled() {
        let config = SessionConfig {
            auto_reconnect: true,
            backoff: BackoffConfig {
                initial: Duration::from_secs(1),
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut h = harness(None, SimulatedFailure::Network, config);

        h.session.enroll();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drain(&mut h.notifications);

        h.session.connectivity_lost("link down");
        assert_eq!(h.session.status(), OrchestratorStatus::Disconnected);
        let lost = drain(&mut h.notifications).pop().unwrap();
        assert_eq!(lost.kind, NotificationKind::Error);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.session.status(), OrchestratorStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_reconnect() {
        let config = SessionConfig {
            auto_reconnect: true,
            ..Default::default()
        };
        let h = harness(None, SimulatedFailure::Network, config);

        h.session.enroll();
        tokio::time::sleep(Duration::from_secs(5)).await;

        h.session.connectivity_lost("link down");
        h.session.reset();
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(h.session.status(), OrchestratorStatus::Disconnected);
    }
}

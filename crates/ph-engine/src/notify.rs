//! Notification dispatcher
//!
//! Turns state transitions and registry events into [`Notification`]s and
//! publishes them on a broadcast channel. Publishing never blocks and never
//! fails the caller: with no listeners, or a lagging listener, notifications
//! are dropped.

use tokio::sync::broadcast;

use ph_core::{Notification, OrchestratorStatus, Snapshot};

/// Capacity of the notification broadcast channel
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Why a session ended up `Disconnected`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Explicit reset by the user
    Requested,
    /// An enrollment step failed
    Failure(String),
    /// An established session lost its connection
    ConnectivityLost(String),
}

/// Registry mutations worth telling the user about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    InviteRecorded {
        from: String,
        service_name: String,
    },
    InviteAccepted {
        from: String,
        service_name: String,
        address: String,
        port: u16,
    },
    ServiceShared {
        service: String,
        email: String,
    },
    ServiceDeleted {
        name: String,
        revoked: usize,
    },
}

/// Decide what, if anything, to emit for a session transition
pub fn transition_notification(
    previous: &Snapshot,
    current: &Snapshot,
    cause: Option<&DisconnectCause>,
) -> Option<Notification> {
    let from = previous.orchestrator_status;
    let to = current.orchestrator_status;
    if from == to {
        return None;
    }

    match to {
        OrchestratorStatus::Connected => {
            let who = current
                .enrollment
                .as_ref()
                .map(|e| e.email.as_str())
                .unwrap_or("unknown user");
            Some(Notification::information(
                "Enrolled",
                format!("Connected to the orchestrator as {}", who),
            ))
        }
        OrchestratorStatus::Disconnected => match cause {
            Some(DisconnectCause::Failure(reason)) => {
                Some(Notification::error("Enrollment failed", reason.clone()))
            }
            Some(DisconnectCause::ConnectivityLost(reason)) => Some(Notification::error(
                "Disconnected from the orchestrator",
                reason.clone(),
            )),
            Some(DisconnectCause::Requested) | None => Some(Notification::warning(
                "Disconnected",
                format!("Session ended while {}", from),
            )),
        },
        _ => None,
    }
}

/// Decide what, if anything, to emit for a registry event
pub fn registry_notification(event: &RegistryEvent) -> Option<Notification> {
    match event {
        RegistryEvent::InviteRecorded { from, service_name } => Some(Notification::information(
            "New invitation",
            format!("{} wants to share '{}' with you", from, service_name),
        )),
        RegistryEvent::InviteAccepted {
            from,
            service_name,
            address,
            port,
        } => Some(Notification::information(
            "Service added",
            format!(
                "'{}' from {} will be reachable at {}:{}",
                service_name, from, address, port
            ),
        )),
        RegistryEvent::ServiceShared { service, email } => Some(Notification::information(
            "Service shared",
            format!("Invited {} to '{}'", email, service),
        )),
        RegistryEvent::ServiceDeleted { revoked: 0, .. } => None,
        RegistryEvent::ServiceDeleted { name, revoked } => Some(Notification::information(
            "Service deleted",
            format!("'{}' removed; access revoked for {} invitee(s)", name, revoked),
        )),
    }
}

/// Publishes notifications to any number of listeners
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: broadcast::Sender<Notification>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Receive every notification published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn on_transition(
        &self,
        previous: &Snapshot,
        current: &Snapshot,
        cause: Option<&DisconnectCause>,
    ) {
        if let Some(notification) = transition_notification(previous, current, cause) {
            self.emit(notification);
        }
    }

    pub fn on_registry_event(&self, event: &RegistryEvent) {
        if let Some(notification) = registry_notification(event) {
            self.emit(notification);
        }
    }

    /// Publish a notification
    pub fn emit(&self, notification: Notification) {
        tracing::debug!(
            kind = %notification.kind,
            title = %notification.title,
            "Notification: {}",
            notification.message
        );
        if self.tx.send(notification).is_err() {
            tracing::trace!("No notification listeners, dropped");
        }
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

//! Snapshot model
//!
//! Immutable value types describing everything a subscriber can observe:
//! enrollment, orchestrator connectivity, published services and the
//! per-collaborator sharing groups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of the orchestrator session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorStatus {
    /// No session; enrollment fields are empty
    #[default]
    Disconnected,
    /// Opening a connection to the orchestrator
    Connecting,
    /// Device flow started, waiting for the user to confirm out-of-band
    WaitingForToken,
    /// Token obtained, resolving the workspace
    RetrievingSpace,
    /// Workspace resolved, resolving the project
    RetrievingProject,
    /// Fully enrolled
    Connected,
}

impl OrchestratorStatus {
    /// The only legal forward step from this status, if any
    pub fn next(self) -> Option<Self> {
        match self {
            OrchestratorStatus::Disconnected => Some(OrchestratorStatus::Connecting),
            OrchestratorStatus::Connecting => Some(OrchestratorStatus::WaitingForToken),
            OrchestratorStatus::WaitingForToken => Some(OrchestratorStatus::RetrievingSpace),
            OrchestratorStatus::RetrievingSpace => Some(OrchestratorStatus::RetrievingProject),
            OrchestratorStatus::RetrievingProject => Some(OrchestratorStatus::Connected),
            OrchestratorStatus::Connected => None,
        }
    }

    /// Whether a session is in progress or established
    pub fn is_active(self) -> bool {
        self != OrchestratorStatus::Disconnected
    }
}

impl fmt::Display for OrchestratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorStatus::Disconnected => write!(f, "disconnected"),
            OrchestratorStatus::Connecting => write!(f, "connecting"),
            OrchestratorStatus::WaitingForToken => write!(f, "waiting for token"),
            OrchestratorStatus::RetrievingSpace => write!(f, "retrieving space"),
            OrchestratorStatus::RetrievingProject => write!(f, "retrieving project"),
            OrchestratorStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Identity of the enrolled user, present only while connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub github_user: Option<String>,
}

/// Someone a local service has been shared with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitee {
    pub name: Option<String>,
    pub email: String,
}

impl Invitee {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }
}

/// A pending offer to access a remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: String,
    pub service_name: String,
    pub service_scheme: Option<String>,
}

/// A service published by the local user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalService {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub scheme: Option<String>,
    pub shared_with: Vec<Invitee>,
    pub available: bool,
}

impl LocalService {
    /// Whether the service is already shared with this email
    pub fn is_shared_with(&self, email: &str) -> bool {
        self.shared_with.iter().any(|i| i.email == email)
    }
}

/// A remote service materialized locally after accepting an invite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub source_name: String,
    pub address: String,
    pub port: u16,
    pub scheme: Option<String>,
    pub available: bool,
}

/// Invites and services from a single collaborator, keyed by email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGroup {
    pub email: String,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub invites: Vec<Invite>,
    pub incoming_services: Vec<Service>,
}

impl ServiceGroup {
    /// Create an empty group for a collaborator
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            image_url: None,
            invites: vec![],
            incoming_services: vec![],
        }
    }

    pub fn invite(&self, id: &str) -> Option<&Invite> {
        self.invites.iter().find(|i| i.id == id)
    }

    pub fn incoming_service(&self, address: &str, port: u16) -> Option<&Service> {
        self.incoming_services
            .iter()
            .find(|s| s.address == address && s.port == port)
    }
}

/// Addresses a single service for availability updates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceRef {
    /// A local service, by name
    Local { name: String },
    /// An incoming service, by its group and endpoint
    Incoming {
        email: String,
        address: String,
        port: u16,
    },
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceRef::Local { name } => write!(f, "{}", name),
            ServiceRef::Incoming {
                email,
                address,
                port,
            } => write!(f, "{}:{} from {}", address, port, email),
        }
    }
}

/// Full observable state at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub orchestrator_status: OrchestratorStatus,
    /// Set only while `orchestrator_status` is `Connected`
    pub enrollment: Option<Enrollment>,
    pub local_services: Vec<LocalService>,
    pub groups: Vec<ServiceGroup>,
}

impl Snapshot {
    pub fn enrolled(&self) -> bool {
        self.enrollment.is_some()
    }

    pub fn local_service(&self, name: &str) -> Option<&LocalService> {
        self.local_services.iter().find(|s| s.name == name)
    }

    pub fn group(&self, email: &str) -> Option<&ServiceGroup> {
        self.groups.iter().find(|g| g.email == email)
    }

    /// Every endpoint currently bound on this machine, local and incoming
    pub fn used_endpoints(&self) -> impl Iterator<Item = (&str, u16)> {
        self.local_services
            .iter()
            .map(|s| (s.address.as_str(), s.port))
            .chain(
                self.groups
                    .iter()
                    .flat_map(|g| g.incoming_services.iter())
                    .map(|s| (s.address.as_str(), s.port)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_forward_chain() {
        let mut status = OrchestratorStatus::Disconnected;
        let mut seen = vec![status];
        while let Some(next) = status.next() {
            seen.push(next);
            status = next;
        }
        assert_eq!(
            seen,
            vec![
                OrchestratorStatus::Disconnected,
                OrchestratorStatus::Connecting,
                OrchestratorStatus::WaitingForToken,
                OrchestratorStatus::RetrievingSpace,
                OrchestratorStatus::RetrievingProject,
                OrchestratorStatus::Connected,
            ]
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(
            format!("{}", OrchestratorStatus::WaitingForToken),
            "waiting for token"
        );
        assert_eq!(format!("{}", OrchestratorStatus::Connected), "connected");
    }

    #[test]
    fn test_default_snapshot_is_disconnected() {
        let snapshot = Snapshot::default();
        assert!(!snapshot.enrolled());
        assert!(!snapshot.orchestrator_status.is_active());
        assert!(snapshot.local_services.is_empty());
        assert!(snapshot.groups.is_empty());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = Snapshot {
            orchestrator_status: OrchestratorStatus::RetrievingSpace,
            ..Default::default()
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains(r#""orchestratorStatus":"retrieving_space""#));
        assert!(json.contains(r#""enrollment":null"#));
    }

    #[test]
    fn test_service_ref_tagging() {
        let r = ServiceRef::Local { name: "web".into() };
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"type":"local","name":"web"}"#);
    }
}

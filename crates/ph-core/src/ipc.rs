//! IPC protocol between clients (CLI, UI bridges) and the engine
//!
//! Uses JSON-encoded messages, one per line, over TCP on localhost (127.0.0.1).
//! Responses and pushed events share the stream; events are only pushed to
//! clients that sent `Subscribe`.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_IPC_PORT;
use crate::error::{EngineError, ErrorKind};
use crate::notification::Notification;
use crate::types::{Invite, ServiceRef, Snapshot};

/// Default IPC address
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}

/// IPC request from a client to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Ping (for keepalive)
    Ping,

    /// Pull the current snapshot
    GetState,

    /// Receive snapshot and notification events, starting with the current snapshot
    Subscribe,

    /// Stop receiving events
    Unsubscribe,

    /// Start enrollment with the orchestrator
    Enroll,

    /// Publish a local service
    CreateService {
        name: String,
        address: String,
        port: u16,
        scheme: Option<String>,
    },

    /// Change the endpoint of a local service
    ModifyService {
        name: String,
        address: String,
        port: u16,
        scheme: Option<String>,
    },

    /// Remove a local service and its shares
    DeleteService { name: String },

    /// Share a local service with someone
    InviteToService { name: String, email: String },

    /// Accept a pending invite
    AcceptInvite { email: String, invite_id: String },

    /// Reject a pending invite
    RejectInvite { email: String, invite_id: String },

    /// Inbound sharing event: an invite arrived from a collaborator
    RecordInvite { email: String, invite: Invite },

    /// Inbound sharing event: collaborator profile details
    UpdateGroupProfile {
        email: String,
        name: Option<String>,
        image_url: Option<String>,
    },

    /// Health signal for a single service
    SetAvailability { service: ServiceRef, available: bool },

    /// Inbound signal: the orchestrator connection dropped
    ConnectivityLost { reason: String },

    /// Disconnect and wipe all state
    Reset,

    /// Flush state and stop the engine
    Shutdown,
}

/// IPC response from the engine to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Current snapshot
    State(Snapshot),

    /// Command accepted
    Ok,

    /// Command rejected
    Error { kind: ErrorKind, message: String },

    /// Pong response
    Pong,
}

impl From<EngineError> for IpcResponse {
    fn from(err: EngineError) -> Self {
        IpcResponse::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// IPC event pushed from the engine to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEvent {
    /// A new snapshot was committed
    StateChanged(Snapshot),

    /// A notification was emitted
    Notification(Notification),
}

/// IPC message wrapper (for framing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcMessage {
    Response(IpcResponse),
    Event(IpcEvent),
}

impl IpcMessage {
    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<IpcResponse> for IpcMessage {
    fn from(resp: IpcResponse) -> Self {
        IpcMessage::Response(resp)
    }
}

impl From<IpcEvent> for IpcMessage {
    fn from(event: IpcEvent) -> Self {
        IpcMessage::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrchestratorStatus;

    #[test]
    fn test_request_serialization() {
        let req = IpcRequest::CreateService {
            name: "web".to_string(),
            address: "127.0.0.1".to_string(),
            port: 8080,
            scheme: Some("http".to_string()),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("create_service"));

        let decoded: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_set_availability_nests_service_ref() {
        let json = r#"{"type":"set_availability","service":{"type":"local","name":"db"},"available":true}"#;
        let decoded: IpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            decoded,
            IpcRequest::SetAvailability {
                service: ServiceRef::Local { name: "db".into() },
                available: true,
            }
        );
    }

    #[test]
    fn test_connectivity_lost_wire_format() {
        let json = r#"{"type":"connectivity_lost","reason":"link down"}"#;
        let decoded: IpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            decoded,
            IpcRequest::ConnectivityLost {
                reason: "link down".into()
            }
        );
    }

    #[test]
    fn test_error_response_carries_kind() {
        let resp: IpcResponse = EngineError::DuplicateName("web".into()).into();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""kind":"duplicate_name""#));
    }

    #[test]
    fn test_message_distinguishes_responses_and_events() {
        let snapshot = Snapshot {
            orchestrator_status: OrchestratorStatus::Connecting,
            ..Default::default()
        };

        let state = serde_json::to_vec(&IpcResponse::State(snapshot.clone())).unwrap();
        let changed = serde_json::to_vec(&IpcEvent::StateChanged(snapshot.clone())).unwrap();
        let notification = serde_json::to_vec(&IpcEvent::Notification(
            Notification::information("t", "m"),
        ))
        .unwrap();

        assert!(matches!(
            IpcMessage::from_bytes(&state).unwrap(),
            IpcMessage::Response(IpcResponse::State(_))
        ));
        assert!(matches!(
            IpcMessage::from_bytes(&changed).unwrap(),
            IpcMessage::Event(IpcEvent::StateChanged(s)) if s == snapshot
        ));
        assert!(matches!(
            IpcMessage::from_bytes(&notification).unwrap(),
            IpcMessage::Event(IpcEvent::Notification(_))
        ));
        assert!(matches!(
            IpcMessage::from_bytes(br#"{"type":"ok"}"#).unwrap(),
            IpcMessage::Response(IpcResponse::Ok)
        ));
    }
}

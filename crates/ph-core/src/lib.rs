//! ph-core: Shared model for porthole
//!
//! This crate provides the snapshot value types, notification types,
//! error kinds, configuration structures and IPC messages used by the
//! engine daemon and the CLI.

pub mod config;
pub mod error;
pub mod ipc;
pub mod notification;
pub mod types;

pub use error::{EngineError, ErrorKind, OrchestratorError};
pub use notification::{Notification, NotificationKind};
pub use types::{
    Enrollment, Invite, Invitee, LocalService, OrchestratorStatus, Service, ServiceGroup,
    ServiceRef, Snapshot,
};

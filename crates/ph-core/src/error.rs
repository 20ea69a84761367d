//! Core error types for porthole

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by engine commands and asynchronous session steps
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A local service with this name already exists
    #[error("A service named '{0}' already exists")]
    DuplicateName(String),

    /// An invite with this id is already pending in the sender's group
    #[error("Invite '{id}' from {email} is already pending")]
    DuplicateInvite { email: String, id: String },

    /// The referenced entity does not exist
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The orchestrator rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// The orchestrator could not be reached
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// A command argument failed local validation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl EngineError {
    /// Shorthand for a `NotFound` error
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            what,
            id: id.into(),
        }
    }

    /// Shorthand for an `InvalidArgument` error
    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidArgument(message.into())
    }

    /// The kind of this error, without its payload
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DuplicateName(_) => ErrorKind::DuplicateName,
            EngineError::DuplicateInvite { .. } => ErrorKind::DuplicateInvite,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::AuthFailure(_) => ErrorKind::AuthFailure,
            EngineError::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Error kind as carried across the IPC boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateName,
    DuplicateInvite,
    NotFound,
    AuthFailure,
    NetworkUnavailable,
    InvalidArgument,
    /// The request itself could not be parsed
    BadRequest,
}

/// Failures reported by an orchestrator client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Credentials were rejected or the device flow was denied
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// The orchestrator could not be reached or timed out
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
}

impl From<OrchestratorError> for EngineError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::AuthFailure(msg) => EngineError::AuthFailure(msg),
            OrchestratorError::NetworkUnavailable(msg) => EngineError::NetworkUnavailable(msg),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

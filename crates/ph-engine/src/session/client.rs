//! Orchestrator client seam
//!
//! The session talks to the orchestrator only through this trait, one
//! method per enrollment step.

use async_trait::async_trait;
use std::fmt;

use ph_core::{Enrollment, OrchestratorError};

/// Device-code flow handle shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
}

/// Bearer token obtained at the end of the device flow
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(pub String);

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<redacted>)")
    }
}

/// Workspace the user belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    pub id: String,
    pub name: String,
}

/// Project inside a space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub space_id: String,
}

/// Profile of the authenticated user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
    pub nickname: Option<String>,
}

impl From<UserInfo> for Enrollment {
    fn from(user: UserInfo) -> Self {
        Enrollment {
            name: user.name,
            email: user.email,
            image: user.picture,
            github_user: user.nickname,
        }
    }
}

/// Network and auth operations against the orchestrator
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Open a connection to the orchestrator
    async fn connect(&self) -> Result<(), OrchestratorError>;

    /// Start the device-code authorization flow
    async fn start_device_flow(&self) -> Result<DeviceCode, OrchestratorError>;

    /// Wait until the user has confirmed the device code
    async fn wait_for_token(&self, code: &DeviceCode) -> Result<AuthToken, OrchestratorError>;

    /// Resolve the user's workspace
    async fn retrieve_space(&self, token: &AuthToken) -> Result<Space, OrchestratorError>;

    /// Resolve the project inside the workspace
    async fn retrieve_project(
        &self,
        token: &AuthToken,
        space: &Space,
    ) -> Result<Project, OrchestratorError>;

    /// Fetch the authenticated user's profile
    async fn user_info(&self, token: &AuthToken) -> Result<UserInfo, OrchestratorError>;
}

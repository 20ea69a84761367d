//! In-process orchestrator
//!
//! Completes every enrollment step after a fixed delay, optionally failing
//! at a configured step. Used by the daemon until a real orchestrator
//! client is wired in, and by tests.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;

use ph_core::config::{SimulatedFailure, SimulatedOrchestratorConfig, SimulatedStep};
use ph_core::OrchestratorError;

use super::client::{AuthToken, DeviceCode, OrchestratorClient, Project, Space, UserInfo};

pub struct SimulatedOrchestrator {
    config: SimulatedOrchestratorConfig,
}

impl SimulatedOrchestrator {
    pub fn new(config: SimulatedOrchestratorConfig) -> Self {
        Self { config }
    }

    async fn step(&self, step: SimulatedStep) -> Result<(), OrchestratorError> {
        tokio::time::sleep(self.config.step_delay).await;

        if self.config.fail_at == Some(step) {
            tracing::debug!("Simulated orchestrator failing at {:?}", step);
            let message = format!("simulated failure at {:?}", step);
            return Err(match self.config.failure {
                SimulatedFailure::Auth => OrchestratorError::AuthFailure(message),
                SimulatedFailure::Network => OrchestratorError::NetworkUnavailable(message),
            });
        }
        Ok(())
    }
}

impl Default for SimulatedOrchestrator {
    fn default() -> Self {
        Self::new(SimulatedOrchestratorConfig::default())
    }
}

fn random_code(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect()
}

#[async_trait]
impl OrchestratorClient for SimulatedOrchestrator {
    async fn connect(&self) -> Result<(), OrchestratorError> {
        self.step(SimulatedStep::Connect).await
    }

    async fn start_device_flow(&self) -> Result<DeviceCode, OrchestratorError> {
        self.step(SimulatedStep::DeviceFlow).await?;
        let user_code = random_code(8);
        Ok(DeviceCode {
            device_code: random_code(32),
            user_code: format!("{}-{}", &user_code[..4], &user_code[4..]),
            verification_uri: "https://localhost/activate".to_string(),
        })
    }

    async fn wait_for_token(&self, code: &DeviceCode) -> Result<AuthToken, OrchestratorError> {
        self.step(SimulatedStep::Token).await?;
        Ok(AuthToken(format!("token-{}", code.device_code)))
    }

    async fn retrieve_space(&self, _token: &AuthToken) -> Result<Space, OrchestratorError> {
        self.step(SimulatedStep::Space).await?;
        Ok(Space {
            id: "space-local".to_string(),
            name: "default".to_string(),
        })
    }

    async fn retrieve_project(
        &self,
        _token: &AuthToken,
        space: &Space,
    ) -> Result<Project, OrchestratorError> {
        self.step(SimulatedStep::Project).await?;
        Ok(Project {
            id: "project-local".to_string(),
            name: "default".to_string(),
            space_id: space.id.clone(),
        })
    }

    async fn user_info(&self, _token: &AuthToken) -> Result<UserInfo, OrchestratorError> {
        Ok(UserInfo {
            name: self.config.user_name.clone(),
            email: self.config.user_email.clone(),
            picture: self.config.user_image.clone(),
            nickname: self.config.github_user.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast(fail_at: Option<SimulatedStep>) -> SimulatedOrchestrator {
        SimulatedOrchestrator::new(SimulatedOrchestratorConfig {
            step_delay: Duration::ZERO,
            fail_at,
            failure: SimulatedFailure::Auth,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_device_code_format() {
        let code = fast(None).start_device_flow().await.unwrap();
        assert_eq!(code.user_code.len(), 9);
        assert_eq!(code.user_code.chars().nth(4), Some('-'));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let client = fast(Some(SimulatedStep::Space));
        let token = AuthToken("t".into());

        assert!(client.connect().await.is_ok());
        assert!(matches!(
            client.retrieve_space(&token).await,
            Err(OrchestratorError::AuthFailure(_))
        ));
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AuthToken("secret".into());
        assert!(!format!("{:?}", token).contains("secret"));
    }
}

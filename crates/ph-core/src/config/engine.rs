//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Default localhost port for the IPC server
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// Configuration for the engine daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// IPC port for CLI/UI communication (localhost only)
    pub ipc_port: u16,

    /// Directory holding the persisted model
    pub data_dir: PathBuf,

    /// Orchestrator session behaviour
    pub session: SessionConfig,

    /// Availability probing of services
    pub health: HealthConfig,

    /// Where accepted invites are bound locally
    pub inlets: InletConfig,

    /// Behaviour of the built-in simulated orchestrator
    pub orchestrator: SimulatedOrchestratorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ipc_port: DEFAULT_IPC_PORT,
            data_dir: super::default_config_dir(),
            session: SessionConfig::default(),
            health: HealthConfig::default(),
            inlets: InletConfig::default(),
            orchestrator: SimulatedOrchestratorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }

    /// Path of the persisted model file
    pub fn model_path(&self) -> PathBuf {
        self.data_dir.join("model.json")
    }
}

/// Orchestrator session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reconnect automatically after connectivity loss
    pub auto_reconnect: bool,

    /// Start enrollment on launch if the previous run was enrolled
    pub reconnect_on_start: bool,

    /// Upper bound for a single orchestrator step
    #[serde(with = "duration_secs")]
    pub step_timeout: Duration,

    /// Delay schedule for automatic reconnects
    pub backoff: BackoffConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            reconnect_on_start: true,
            step_timeout: Duration::from_secs(120),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Availability monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Whether to probe services at all
    pub enabled: bool,

    /// Time between probe rounds
    #[serde(with = "duration_secs")]
    pub interval: Duration,

    /// Connect timeout for a single probe
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(500),
        }
    }
}

/// Local endpoint allocation for accepted invites
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InletConfig {
    pub bind_address: String,
    pub port_range_start: u16,
    pub port_range_end: u16,
}

impl Default for InletConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port_range_start: 15000,
            port_range_end: 15999,
        }
    }
}

/// Step of the enrollment flow, used to inject simulated failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedStep {
    Connect,
    DeviceFlow,
    Token,
    Space,
    Project,
}

/// Which failure a simulated step produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedFailure {
    Auth,
    #[default]
    Network,
}

/// Behaviour of the built-in simulated orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedOrchestratorConfig {
    /// Delay applied to every step
    #[serde(with = "duration_millis")]
    pub step_delay: Duration,

    pub user_name: String,
    pub user_email: String,
    pub user_image: Option<String>,
    pub github_user: Option<String>,

    /// Fail the flow at this step
    pub fail_at: Option<SimulatedStep>,
    pub failure: SimulatedFailure,
}

impl Default for SimulatedOrchestratorConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(300),
            user_name: "Local User".to_string(),
            user_email: "user@localhost".to_string(),
            user_image: None,
            github_user: None,
            fail_at: None,
            failure: SimulatedFailure::default(),
        }
    }
}

//! Orchestrator session: state machine, client seam and the async driver

mod client;
mod machine;
mod orchestrator;
mod reconnect;
mod simulated;

pub use client::{AuthToken, DeviceCode, OrchestratorClient, Project, Space, UserInfo};
pub use machine::{SessionEvent, SessionMachine, TransitionError};
pub use orchestrator::OrchestratorSession;
pub use reconnect::ExponentialBackoff;
pub use simulated::SimulatedOrchestrator;

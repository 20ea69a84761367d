//! IPC client for communicating with the engine
//!
//! Uses TCP on localhost for cross-platform compatibility.

mod client;

pub use client::EngineClient;

// Re-export constants and types from ph_core
pub use ph_core::config::DEFAULT_IPC_PORT;
pub use ph_core::ipc::{default_ipc_address, IpcEvent};

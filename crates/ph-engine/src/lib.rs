//! ph-engine: Application state engine for porthole
//!
//! Owns the single observable [`ph_core::Snapshot`] and everything that
//! changes it: the orchestrator session, the service registry and the
//! command interface. Committed snapshots and notifications are pushed to
//! subscribers in process and to IPC clients.

pub mod commands;
pub mod engine;
pub mod health;
pub mod ipc;
pub mod notify;
pub mod registry;
pub mod repository;
pub mod session;
pub mod store;

pub use commands::{Command, CommandInterface};
pub use engine::Engine;
pub use notify::NotificationDispatcher;
pub use registry::ServiceRegistry;
pub use store::StateStore;

//! IPC server for CLI/UI communication
//!
//! Provides a localhost TCP server that the CLI and UI bridges use to
//! submit commands to the running engine and follow its snapshots.

mod server;

pub use server::IpcServer;

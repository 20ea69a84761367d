//! porthole: Command-line interface for the porthole engine
//!
//! Provides the `porthole` CLI for enrolling, publishing and sharing
//! services, and answering invitations through a running engine.

pub mod commands;
pub mod ipc;
pub mod output;

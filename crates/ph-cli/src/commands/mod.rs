//! CLI command implementations

mod invite;
mod service;
mod session;
mod status;

pub use invite::{accept_command, reject_command};
pub use service::{create_command, delete_command, modify_command, share_command};
pub use session::{enroll_command, reset_command, stop_command};
pub use status::{status_command, watch_command};

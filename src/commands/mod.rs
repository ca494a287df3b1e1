//! Command handlers for the CLI application.
//!
//! - `client`: talk to a running daemon over D-Bus (write, read, show, hooks)
//! - `apply`: one-shot apply straight to sysfs

pub mod apply;
pub mod client;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

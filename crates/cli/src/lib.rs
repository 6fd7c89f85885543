//! CLI tool for a memcached cluster.
//!
//! Provides commands for:
//! - Inspecting key placement and ring balance (offline)
//! - Reading and writing keys
//! - Querying node versions

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;

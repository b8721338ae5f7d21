//! CLI tool for running and checking a messaging cluster.
//!
//! Provides commands for:
//! - Validating a cluster configuration file
//! - Running a traffic drill across every configured node

pub mod commands;
pub mod config;

pub use commands::{CommandResult, DrillReport};
pub use config::{CliConfig, Command, DrillArgs};

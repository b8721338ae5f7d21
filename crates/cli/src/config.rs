//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use streaming::{RetryPolicy, RuntimeOptions, WireFormat};

use crate::commands::{self, CommandResult};

/// Peer-to-peer messaging fabric.
#[derive(Debug, Parser)]
#[command(name = "fabric", version)]
pub struct CliConfig {
    /// Cluster configuration file (`id, address` per line).
    #[arg(short, long, default_value = "clusterconf.txt", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate the cluster configuration and list its nodes.
    Check,
    /// Run every configured node in this process and exchange traffic.
    Drill(DrillArgs),
}

#[derive(Debug, Clone, Args)]
pub struct DrillArgs {
    /// Rounds of traffic; each node sends once per round (per peer when
    /// broadcasting).
    #[arg(long, default_value_t = 20)]
    pub rounds: usize,

    /// Broadcast to every peer instead of sending around the ring.
    #[arg(long)]
    pub broadcast: bool,

    /// Pause after every 10th message, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub delay_ms: u64,

    /// Give up waiting for deliveries after this many seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Emit the legacy `{dst id payload}` text format.
    #[arg(long)]
    pub legacy_wire: bool,

    /// Retries per envelope after the first failed attempt.
    #[arg(long, default_value_t = streaming::protocol::MAX_RETRIES)]
    pub max_retries: u32,

    /// Print the final report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl DrillArgs {
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
            wire_format: if self.legacy_wire {
                WireFormat::Legacy
            } else {
                WireFormat::Framed
            },
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CliConfig {
    pub fn run(&self) -> anyhow::Result<CommandResult> {
        commands::execute(self)
    }
}

//! CLI entry point for the messaging fabric.

use clap::Parser;
use cli::CliConfig;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = CliConfig::parse();
    let result = config.run()?;
    if !result.is_success() {
        std::process::exit(result.exit_code());
    }
    Ok(())
}

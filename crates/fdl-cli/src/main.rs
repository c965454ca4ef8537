//! fdroid-dl - F-Droid repository mirror CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fdl_cli::cmd;
use fdl_cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --debug
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
    tracing::debug!("Debug mode is on");

    let layout = cli.layout();
    let settings = cli.tuning.settings();
    cmd::update::update(layout, settings, &cli.command.phases()).await?;
    Ok(())
}

//! Shoal CLI - Command-line interface
//!
//! Downloads files from several HTTP sources at once.

mod commands;

use clap::Parser;
use shoal_core::ShoalError;
use shoal_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "Multi-source swarm downloader")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    if let Err(e) = commands::handle_command(cli.command).await {
        tracing::error!("{e:#}");
        match e.downcast_ref::<ShoalError>() {
            Some(error) => eprintln!("Error: {}", error.user_message()),
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }

    Ok(())
}

// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "luma-relay")]
#[command(about = "Live NV12 relay with accelerated luma enhancement")]
#[command(version = luma_relay::constants::app_info::version())]
struct Cli {
    /// Configuration file (default: ~/.config/luma-relay/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture, enhance and stream until interrupted
    Run(cli::RelayArgs),

    /// Print the capture and stream pipeline descriptions
    Pipelines(cli::RelayArgs),

    /// List compute adapters visible to the accelerator
    Adapters,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=luma_relay=trace, RUST_LOG=telemetry=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cli::run_relay(cli.config.as_deref(), args),
        Commands::Pipelines(args) => cli::print_pipelines(cli.config.as_deref(), args),
        Commands::Adapters => cli::list_adapters(),
    }
}

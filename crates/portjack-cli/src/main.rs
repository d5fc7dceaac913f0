//! portjack CLI - drive the audio-server backend against the loopback server.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portjack")]
#[command(author, version, about = "portjack audio-server backend CLI", long_about = None)]
struct Cli {
    /// Log debug events (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file [default: ./portjack.toml, then the user config]
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a sine tone through an output stream
    Tone(commands::tone::ToneArgs),

    /// Open a stream and list its ports and connections
    Ports(commands::ports::PortsArgs),

    /// Show or initialize the configuration file
    Config(commands::config::ConfigArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Tone(args) => commands::tone::run(args, config),
        Commands::Ports(args) => commands::ports::run(args, config),
        Commands::Config(args) => commands::config::run(args, config),
    }
}

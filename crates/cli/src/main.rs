//! exposer - watch asset-discovery providers and record exposed endpoints

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;
mod progress;

use commands::{MonitorArgs, cmd_config_init, cmd_config_show, cmd_monitor};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "exposer")]
#[command(about = "Watch asset-discovery providers and record exposed endpoints")]
#[command(after_help = "\
QUICK START:
  exposer config init                          # Write default config
  exposer monitor -q 'ssl:\"example.com\"'      # Monitor with the default provider
  exposer monitor -q 'org:\"Example\"' -e all   # Monitor with every provider

Stop monitoring with Ctrl-C.")]
struct Cli {
  /// Default log level; RUST_LOG takes precedence
  #[arg(long, global = true, default_value = "info", value_parser = ["error", "warn", "info", "debug", "trace"])]
  log_level: String,

  /// Also write logs to this file
  #[arg(long, global = true, value_name = "FILE")]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `exposer config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show the effective configuration
  #[command(long_about = "Show the effective configuration.\n\n\
    Displays which config file is being used and its contents, with environment \
    overrides applied and the password masked.")]
  Show {
    /// Config file (default: $EXPOSER_CONFIG or ~/.config/exposer/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
  },

  /// Write a default config file
  Init {
    /// Output path (default: ~/.config/exposer/config.toml)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Poll discovery providers and merge results into a new index
  #[command(after_help = "\
PROVIDERS:
  shodan (default), shodan-idb, fofa, censys, quake, hunter, zoomeye,
  netlas, criminalip, publicwww, hunterhow, or 'all'

Each run creates a fresh index named <timestamp>_uncover_results.")]
  Monitor {
    /// Search queries, comma-separated
    #[arg(short, long)]
    query: String,
    /// Providers, comma-separated, or 'all'
    #[arg(short = 'e', long = "engine", default_value = "")]
    engines: String,
    /// Config file (default: $EXPOSER_CONFIG or ~/.config/exposer/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Seconds between polling passes (overrides config)
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,
  },
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let _guard = init_logging(&cli.log_level, cli.log_file.as_deref())?;

  match cli.command {
    Commands::Monitor {
      query,
      engines,
      config,
      poll_interval,
    } => {
      cmd_monitor(MonitorArgs {
        query,
        engines,
        config,
        poll_interval,
      })
      .await
    }

    Commands::Config { command } => match command {
      ConfigCommand::Show { config } => cmd_config_show(config.as_deref()),
      ConfigCommand::Init { output, force } => cmd_config_init(output.as_deref(), force),
    },
  }
}

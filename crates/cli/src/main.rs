//! Readygate CLI - Main Entry Point
//!
//! Starts (or reuses) a local service, waits for it to accept connections,
//! runs a verification step against it, and stops what it started.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{init, probe, run, EXIT_SETUP_ERROR};
use output::OutputFormat;
use readygate_harness::HarnessConfig;

/// Readygate - readiness-gated service verification
#[derive(Parser)]
#[command(name = "readygate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        default_value = "readygate.toml",
        env = "READYGATE_CONFIG",
        global = true
    )]
    config: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch or reuse the service, verify it, tear it down (default)
    Run(run::RunArgs),

    /// Check once whether the service is reachable
    Probe(probe::ProbeArgs),

    /// Write a default configuration file
    Init(init::InitArgs),
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // stdout is reserved for results
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<HarnessConfig> {
    HarnessConfig::load(path).with_context(|| format!("cannot load {}", path.display()))
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Run(run::RunArgs::default()));

    match command {
        Commands::Run(args) => run::execute(args, load_config(&cli.config)?, cli.format).await,
        Commands::Probe(args) => probe::execute(args, load_config(&cli.config)?, cli.format).await,
        Commands::Init(args) => {
            init::execute(args, &cli.config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(format_args!("{:#}", e));
            ExitCode::from(EXIT_SETUP_ERROR)
        }
    }
}

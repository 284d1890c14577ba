// ABOUTME: CLI entry point for database-reconciler
// ABOUTME: Parses commands and routes to the run, watch, and status handlers

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use database_reconciler::commands;

#[derive(Parser)]
#[command(name = "database-reconciler")]
#[command(about = "Bidirectional reconciliation between a primary and a secondary row store", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass over the configured databases
    Run {
        /// Path to reconcile.toml
        #[arg(long, env = "RECONCILE_CONFIG")]
        config: PathBuf,
        /// Reconcile only these databases (comma-separated)
        #[arg(long, value_delimiter = ',')]
        databases: Option<Vec<String>>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run reconciliation passes continuously at a fixed interval
    Watch {
        /// Path to reconcile.toml
        #[arg(long, env = "RECONCILE_CONFIG")]
        config: PathBuf,
        /// Reconcile only these databases (comma-separated)
        #[arg(long, value_delimiter = ',')]
        databases: Option<Vec<String>>,
        /// Seconds between passes
        #[arg(long, default_value_t = 300)]
        interval: u64,
        /// Stop after this many passes (runs forever when omitted)
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Show the last recorded run of each database
    Status {
        /// Path to reconcile.toml
        #[arg(long, env = "RECONCILE_CONFIG")]
        config: PathBuf,
        /// Show only these databases (comma-separated)
        #[arg(long, value_delimiter = ',')]
        databases: Option<Vec<String>>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            databases,
            json,
        } => {
            if !commands::run(&config, databases, json)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Watch {
            config,
            databases,
            interval,
            cycles,
        } => commands::watch(&config, databases, Duration::from_secs(interval), cycles),
        Commands::Status { config, databases } => commands::status(&config, databases),
    }
}

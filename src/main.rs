// ABOUTME: CLI entry point for changelog-replicator
// ABOUTME: Parses commands, sets up logging and TLS policy, and routes to handlers

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use changelog_replicator::commands;

#[derive(Parser)]
#[command(name = "changelog-replicator")]
#[command(about = "Replay a MySQL change log onto a PostgreSQL table", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Directory for per-run log files
    #[arg(long = "log-dir", env = "LOG_DIR", global = true, default_value = "logs")]
    log_dir: PathBuf,
    /// Log to stdout instead of a file
    #[arg(long = "log-stdout", global = true, default_value_t = false)]
    log_stdout: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send heartbeats and reconcile pending change log entries until stopped
    Run(commands::RunArgs),
    /// Show change log entry counts by status
    Status(commands::StatusArgs),
    /// Print the shift bucket for an event timestamp
    ShiftDate(commands::ShiftDateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // shift-date is a pure lookup and keeps its output on the console
    let to_stdout = cli.log_stdout || matches!(cli.command, Commands::ShiftDate(_));
    if let Some(path) = changelog_replicator::logging::init(&cli.log, &cli.log_dir, to_stdout)? {
        println!("Logging to {}", path.display());
    }

    changelog_replicator::postgres::init_tls_policy(cli.allow_self_signed_certs);

    match cli.command {
        Commands::Run(args) => commands::run(args).await,
        Commands::Status(args) => commands::status(args).await,
        Commands::ShiftDate(args) => commands::shift_date(args),
    }
}

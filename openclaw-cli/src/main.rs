//! openclaw: operational tooling for the OpenClaw agent platform.
//!
//! Currently hosts the storage diagnostics: `openclaw storage status`
//! and the migration planner `openclaw storage migrate`.

use clap::{Parser, Subcommand};
use colored::Colorize;
use openclaw_storage::StorageError;

mod storage;

/// OpenClaw platform tooling
#[derive(Parser)]
#[command(name = "openclaw")]
#[command(about = "Operational tooling for the OpenClaw agent platform", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage the storage layer
    ///
    /// `status` shows how each namespace resolves (backend and
    /// classification); `migrate` plans data movement between backends.
    Storage {
        #[command(subcommand)]
        command: storage::StorageCommand,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Storage { command } => storage::run(command).await,
    };

    if let Err(err) = result {
        eprintln!("{} {err:#}", "error:".red().bold());
        if let Some(hint) = err
            .downcast_ref::<StorageError>()
            .and_then(StorageError::hint)
        {
            eprintln!("{} set {hint} in the storage configuration", "hint:".yellow());
        }
        std::process::exit(1);
    }
}

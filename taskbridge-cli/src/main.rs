//! taskbridge — keep markdown task lists in sync with a remote task service.
//!
//! # Usage
//!
//! ```text
//! taskbridge init --vault <path> --token <token> [--api-url <url>]
//! taskbridge sync [--full] [--json]
//! taskbridge status [--json]
//! taskbridge daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, init::InitArgs, status::StatusArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "taskbridge",
    version,
    about = "Bidirectional sync between markdown task lists and a remote task service",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the taskbridge configuration file.
    Init(InitArgs),

    /// Run one sync cycle now.
    Sync(SyncArgs),

    /// Show tracked documents and pending work from the persisted store.
    Status(StatusArgs),

    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

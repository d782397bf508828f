//! Tally: incremental match-feed sync.
//!
//! # Usage
//!
//! ```text
//! tally init --feed-dir <dir>
//! tally calendar add --season <S> --competition <C>
//! tally calendar refresh
//! tally sync <id> | --due [--json]
//! tally ack <id> <checksum> | --message <file>
//! tally unack <id>
//! tally ids --from <date> --to <date> | --season <S> --competition <C>
//! tally status [--json]
//! tally daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    ack::{AckArgs, UnackArgs},
    calendar::CalendarCommand,
    daemon::DaemonCommand,
    ids::IdsArgs,
    init::InitArgs,
    status::StatusArgs,
    sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tally",
    version,
    about = "Fingerprint-gated incremental sync of sports match feeds",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Point the configuration at a feed directory.
    Init(InitArgs),

    /// Load and refresh fixture calendars.
    Calendar {
        #[command(subcommand)]
        command: CalendarCommand,
    },

    /// Sync one game, or every game currently due.
    Sync(SyncArgs),

    /// Record a checksum as durably received downstream.
    Ack(AckArgs),

    /// Forget the acknowledged checksum of a game.
    Unack(UnackArgs),

    /// List game ids by kickoff range or by season calendar.
    Ids(IdsArgs),

    /// Show due games and their acknowledgment state.
    Status(StatusArgs),

    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Calendar { command } => commands::calendar::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Ack(args) => args.run(),
        Commands::Unack(args) => args.run(),
        Commands::Ids(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

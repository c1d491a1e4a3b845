//! Fieldsync CLI
//!
//! Command-line tools for inspecting changesets and the sync state machine.
//!
//! # Commands
//!
//! - `hash` - Recompute the hashes of every item in a changeset
//! - `build` - Turn a pending-change file into a changeset
//! - `verify` - Walk a changeset from a chain head
//! - `simulate` - Run the sync reducer over a scripted event list

mod commands;

use clap::{Parser, Subcommand};
use fieldsync_protocol::GENESIS_HASH;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fieldsync changeset and sync state tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute the hashes of every item in a changeset file
    Hash {
        /// Changeset file (JSON array of items)
        file: PathBuf,

        /// Actor the items were hashed for
        #[arg(short, long)]
        actor: String,
    },

    /// Build a changeset from a pending-change file
    Build {
        /// Pending changes (JSON array)
        file: PathBuf,

        /// Actor to hash for
        #[arg(short, long)]
        actor: String,

        /// Chain head the changeset extends
        #[arg(long, default_value = GENESIS_HASH)]
        head: String,

        /// Write the changeset here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify a changeset file against a chain head
    Verify {
        /// Changeset file (JSON array of items)
        file: PathBuf,

        /// Actor the items were hashed for
        #[arg(short, long)]
        actor: String,

        /// Expected chain head before the first item
        #[arg(long, default_value = GENESIS_HASH)]
        head: String,
    },

    /// Run the sync reducer over a scripted list of events
    Simulate {
        /// Events (JSON array, e.g. [{"event":"foreground"}])
        file: PathBuf,

        /// Starting state as JSON (default: disconnected)
        #[arg(short, long)]
        state: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let json = match cli.format.as_str() {
        "text" => false,
        "json" => true,
        other => return Err(format!("Unknown format: {other} (expected text or json)").into()),
    };

    match cli.command {
        Commands::Hash { file, actor } => commands::hash::run(&file, &actor, json)?,
        Commands::Build {
            file,
            actor,
            head,
            output,
        } => commands::build::run(&file, &actor, &head, output.as_deref())?,
        Commands::Verify { file, actor, head } => {
            commands::verify::run(&file, &actor, &head, json)?
        }
        Commands::Simulate { file, state } => {
            commands::simulate::run(&file, state.as_deref(), json)?
        }
        Commands::Version => {
            println!("fieldsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

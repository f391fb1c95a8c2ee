//! driftsync CLI
//!
//! Command-line tools for driftsync local stores.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `put` / `delete` - Write records the way an application would
//! - `list` - List an owner's records
//! - `sync` - Sync an owner against a hub snapshot file
//! - `purge` - Hard-delete confirmed soft deletes on both sides
//! - `compact` - Rewrite the journal without superseded frames

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// driftsync command-line tools.
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Create a record, or edit it when --id is given
    Put {
        /// Owning principal
        #[arg(short, long)]
        owner: String,

        /// Record to edit
        #[arg(long)]
        id: Option<String>,

        /// Payload (stored as UTF-8 bytes)
        payload: String,
    },

    /// Soft-delete a record
    Delete {
        /// Record to delete
        id: String,
    },

    /// List an owner's records, newest first
    List {
        /// Owning principal
        #[arg(short, long)]
        owner: String,

        /// Only records awaiting a push
        #[arg(long)]
        pending: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Sync an owner against a hub snapshot file
    Sync {
        /// Owning principal
        #[arg(short, long)]
        owner: String,

        /// Hub snapshot file (created if missing)
        #[arg(short, long)]
        remote: PathBuf,
    },

    /// Hard-delete soft deletes confirmed longer ago than the retention
    Purge {
        /// Owning principal
        #[arg(short, long)]
        owner: String,

        /// Hub snapshot file
        #[arg(short, long)]
        remote: PathBuf,

        /// Retention in seconds
        #[arg(long, default_value = "604800")]
        retention: u64,
    },

    /// Rewrite the journal without superseded frames
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Put { owner, id, payload } => {
            let path = cli.path.ok_or("Store path required for put")?;
            commands::records::put(&path, &owner, id.as_deref(), payload.into_bytes())?;
        }
        Commands::Delete { id } => {
            let path = cli.path.ok_or("Store path required for delete")?;
            commands::records::delete(&path, &id)?;
        }
        Commands::List {
            owner,
            pending,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for list")?;
            commands::records::list(&path, &owner, pending, &format)?;
        }
        Commands::Sync { owner, remote } => {
            let path = cli.path.ok_or("Store path required for sync")?;
            commands::sync::run(&path, &owner, &remote)?;
        }
        Commands::Purge {
            owner,
            remote,
            retention,
        } => {
            let path = cli.path.ok_or("Store path required for purge")?;
            commands::sync::purge(&path, &owner, &remote, retention)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("driftsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

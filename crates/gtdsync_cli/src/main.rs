//! gtdsync CLI
//!
//! Maintenance tools for a gtdsync store file.
//!
//! # Commands
//!
//! - `inspect` - Row counts, pending pushes and sync metadata
//! - `purge` - Physically remove aged, confirmed tombstones
//! - `reset-cursor` - Forget the change cursor so the next cycle resyncs fully

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// gtdsync store maintenance tools.
#[derive(Parser)]
#[command(name = "gtdsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
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
    /// Display row counts and sync metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove tombstones older than the retention window
    Purge {
        /// Retention window in days
        #[arg(short, long, default_value = "30")]
        retention_days: u64,
    },

    /// Clear the change cursor, forcing a full resync on the next cycle
    ResetCursor,

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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Purge { retention_days } => {
            let path = cli.path.ok_or("Store path required for purge")?;
            commands::purge::run(&path, retention_days)?;
        }
        Commands::ResetCursor => {
            let path = cli.path.ok_or("Store path required for reset-cursor")?;
            commands::reset_cursor::run(&path)?;
        }
        Commands::Version => {
            println!("gtdsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Store schema v{}", gtdsync_store::SCHEMA_VERSION);
        }
    }

    Ok(())
}

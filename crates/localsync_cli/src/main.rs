//! localsync CLI
//!
//! Command-line tools for localsync store files.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and dirty-queue totals
//! - `dirty` - List queued operations
//! - `get` - Print the value stored under a key
//! - `compact` - Rewrite the store log without dead records

mod commands;

use clap::{Parser, Subcommand};
use localsync_core::DEFAULT_DIRTY_QUEUE_KEY;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// localsync command-line store tools.
#[derive(Parser)]
#[command(name = "localsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Store key holding the dirty queue
    #[arg(global = true, long, default_value = DEFAULT_DIRTY_QUEUE_KEY)]
    queue_key: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and dirty-queue totals
    Inspect {
        /// List every live key
        #[arg(short, long)]
        keys: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued operations
    Dirty {
        /// Only show operations filed under this storage key
        #[arg(short, long)]
        key: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the value stored under a key
    Get {
        /// Storage key
        key: String,
    },

    /// Rewrite the store log without dead records
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
        Commands::Inspect { keys, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &cli.queue_key, keys, &format)?;
        }
        Commands::Dirty { key, format } => {
            let path = cli.path.ok_or("Store path required for dirty")?;
            commands::dirty::run(&path, &cli.queue_key, key.as_deref(), &format)?;
        }
        Commands::Get { key } => {
            let path = cli.path.ok_or("Store path required for get")?;
            commands::get::run(&path, &key)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("localsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

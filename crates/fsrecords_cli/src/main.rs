//! fsrecords CLI
//!
//! Command-line tools for fsrecords store directories.
//!
//! # Commands
//!
//! - `inspect` - Display the records header, store files and marker state
//! - `verify` - Check whether the store would open without a rebuild
//! - `invalidate` - Schedule a rebuild for the next connect

mod commands;

use clap::{Parser, Subcommand};
use fsrecords_storage::StorageKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// fsrecords command-line store tools.
#[derive(Parser)]
#[command(name = "fsrecords")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display the records header, store files and marker state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check whether the store opens without a rebuild (read-only)
    Verify {
        /// Expected implementation version
        #[arg(long = "store-version", default_value_t = 1)]
        store_version: u32,

        /// Expected records backend (defaults to the one in the header)
        #[arg(short, long)]
        kind: Option<StorageKind>,
    },

    /// Schedule a rebuild for the next connect
    Invalidate {
        /// Reason recorded in the corruption marker
        #[arg(short, long)]
        reason: String,

        /// Expected implementation version
        #[arg(long = "store-version", default_value_t = 1)]
        store_version: u32,

        /// Expected records backend (defaults to the one in the header)
        #[arg(short, long)]
        kind: Option<StorageKind>,
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
        Commands::Verify {
            store_version,
            kind,
        } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, store_version, kind)?;
        }
        Commands::Invalidate {
            reason,
            store_version,
            kind,
        } => {
            let path = cli.path.ok_or("Store path required for invalidate")?;
            commands::invalidate::run(&path, &reason, store_version, kind)?;
        }
        Commands::Version => {
            println!("fsrecords CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

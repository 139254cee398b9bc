//! Pile CLI
//!
//! Command-line tools for persisted pile data directories.
//!
//! # Commands
//!
//! - `inspect` - Display pile statistics and segment details
//! - `verify` - Crawl every segment and read back every chunk
//! - `compact` - Retire segments that hold no live chunks
//! - `dump` - List live chunks for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Pile command-line tools.
#[derive(Parser)]
#[command(name = "pile")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the pile data directory
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
    /// Display pile statistics
    Inspect {
        /// Show per-segment details
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify chunk headers, links and payloads
    Verify,

    /// Retire segments without live chunks
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump live chunks for debugging
    Dump {
        /// Maximum number of chunks to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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

    match cli.command {
        Commands::Inspect { segments, format } => {
            let path = cli.path.ok_or("Pile path required for inspect")?;
            commands::inspect::run(&path, segments, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Pile path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Pile path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Dump { limit, format } => {
            let path = cli.path.ok_or("Pile path required for dump")?;
            commands::dump::run(&path, limit, &format)?;
        }
        Commands::Version => {
            println!("Pile CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Pile Core v{}", pile_core::VERSION);
        }
    }

    Ok(())
}

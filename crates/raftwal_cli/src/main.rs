//! raftwal CLI
//!
//! Offline tools for raftwal data directories.
//!
//! # Commands
//!
//! - `inspect` - Display meta fields, snapshot and segments
//! - `verify` - Check every file without modifying it
//! - `dump` - Print log entries
//! - `version` - Print versions

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// raftwal command-line tools.
#[derive(Parser)]
#[command(name = "raftwal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display meta fields, snapshot and segments
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify segment and meta files without modifying them
    Verify,

    /// Print log entries
    Dump {
        /// First index to print (defaults to the first available)
        #[arg(long)]
        from: Option<u64>,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Data directory path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Data directory path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Dump {
            from,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Data directory path required for dump")?;
            commands::dump::run(&path, from, limit, format)?;
        }
        Commands::Version => {
            println!("raftwal CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("raftwal core v{}", raftwal_core::VERSION);
        }
    }

    Ok(())
}

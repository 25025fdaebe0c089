//! NoteSync CLI
//!
//! Command-line tools for inspecting and maintaining an offline cache
//! directory. Run them while the app is closed; the cache directory admits
//! one process at a time.
//!
//! # Commands
//!
//! - `inspect` - Display cache statistics and queue length
//! - `dump-queue` - List pending mutations in sync order
//! - `compact` - Rewrite the log file to reclaim space
//! - `clear` - Drop every cached entity and pending mutation

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// NoteSync offline cache tools.
#[derive(Parser)]
#[command(name = "notesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cache directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display cache statistics and queue length
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List pending mutations in sync order
    DumpQueue {
        /// Maximum number of items to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Rewrite the log file to reclaim space
    Compact,

    /// Drop every cached entity and pending mutation
    Clear {
        /// Confirm that unsynced changes may be lost
        #[arg(long)]
        yes: bool,
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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Cache path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::DumpQueue { limit, format } => {
            let path = cli.path.ok_or("Cache path required for dump-queue")?;
            commands::dump_queue::run(&path, limit, format)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Cache path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Clear { yes } => {
            let path = cli.path.ok_or("Cache path required for clear")?;
            commands::clear::run(&path, yes)?;
        }
        Commands::Version => {
            println!("NoteSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Record format v{}", notesync_protocol::RECORD_VERSION);
        }
    }

    Ok(())
}

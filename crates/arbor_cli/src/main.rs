//! Arbor CLI
//!
//! Command-line tools for Arbor database directories.
//!
//! # Commands
//!
//! - `inspect` - Show collections and document counts
//! - `dump-log` - Dump journal records for debugging
//! - `recover` - Open the database, run recovery and checkpoint
//! - `check-index` - Compile an index configuration file

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Arbor command-line database tools.
#[derive(Parser)]
#[command(name = "arbor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format shared by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show collections and document counts (read-only)
    Inspect {
        /// Also list documents
        #[arg(short, long)]
        documents: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Dump journal records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start from this offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Open the database, run recovery and write a checkpoint
    Recover {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Compile an index configuration file
    CheckIndex {
        /// File holding an <index> element
        file: PathBuf,

        /// Also analyze this XML document with the compiled rules
        #[arg(short, long)]
        document: Option<PathBuf>,

        /// Index depth used when the configuration sets none
        #[arg(long, default_value = "1")]
        default_depth: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { documents, format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, documents, format)?;
        }
        Commands::DumpLog {
            limit,
            offset,
            format,
        } => {
            let path = cli.path.ok_or("Database path required for dump-log")?;
            commands::dump_log::run(&path, limit, offset, format)?;
        }
        Commands::Recover { format } => {
            let path = cli.path.ok_or("Database path required for recover")?;
            commands::recover::run(&path, format)?;
        }
        Commands::CheckIndex {
            file,
            document,
            default_depth,
            format,
        } => {
            commands::check_index::run(&file, document.as_deref(), default_depth, format)?;
        }
        Commands::Version => {
            println!("Arbor CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

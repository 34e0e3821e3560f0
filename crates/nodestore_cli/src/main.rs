//! NodeStore CLI
//!
//! Command-line tools for embedded NodeStore directories.
//!
//! # Commands
//!
//! - `inspect` - Display record count, id generator and size
//! - `dump` - Print one decoded node record as JSON
//! - `idgen` - Show or set the id generator

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// NodeStore command-line store tools.
#[derive(Parser)]
#[command(name = "nodestore")]
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
    /// Display store statistics
    Inspect {
        /// List every record id
        #[arg(short, long)]
        records: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a node record as JSON
    Dump {
        /// Record id
        id: String,
    },

    /// Show or set the id generator
    Idgen {
        /// New generator value
        #[arg(long)]
        set: Option<u64>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { records, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, records, &format)?;
        }
        Commands::Dump { id } => {
            let path = cli.path.ok_or("Store path required for dump")?;
            commands::dump::run(&path, &id)?;
        }
        Commands::Idgen { set } => {
            let path = cli.path.ok_or("Store path required for idgen")?;
            commands::idgen::run(&path, set)?;
        }
        Commands::Version => {
            println!("NodeStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("NodeStore Core v{}", nodestore_core::VERSION);
        }
    }

    Ok(())
}

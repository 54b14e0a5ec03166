//! HeartSync CLI
//!
//! Command-line tools for a HeartSync data directory.
//!
//! # Commands
//!
//! - `inspect` - Display staged records, pending queues and change tokens
//! - `record` - Stage a record offline, as the app does without network
//! - `simulate` - Run a sync session against an in-memory remote
//! - `reset` - Remove all staged state

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// HeartSync command-line tools.
#[derive(Parser)]
#[command(name = "heartsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long, env = "HEARTSYNC_PATH")]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display staged records, pending queues and change tokens
    Inspect {
        /// List the staged records
        #[arg(short, long)]
        records: bool,

        /// Maximum number of records to list
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Stage a record offline
    Record {
        /// Beats per minute
        value: i64,

        /// Capture time (RFC 3339), defaults to now
        #[arg(short, long)]
        at: Option<String>,
    },

    /// Run a sync session against an in-memory remote
    Simulate {
        /// Number of live workout samples to stream before syncing
        #[arg(short, long, default_value = "0")]
        samples: usize,

        /// Account signed in on the simulated remote
        #[arg(short, long, default_value = "simulator")]
        account: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove all staged state
    Reset {
        /// Confirm the reset
        #[arg(short, long)]
        yes: bool,
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
        Commands::Inspect {
            records,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Data path required for inspect")?;
            commands::inspect::run(&path, records, limit, &format)?;
        }
        Commands::Record { value, at } => {
            let path = cli.path.ok_or("Data path required for record")?;
            commands::record::run(&path, value, at.as_deref())?;
        }
        Commands::Simulate {
            samples,
            account,
            format,
        } => {
            let path = cli.path.ok_or("Data path required for simulate")?;
            commands::simulate::run(&path, samples, &account, &format)?;
        }
        Commands::Reset { yes } => {
            let path = cli.path.ok_or("Data path required for reset")?;
            commands::reset::run(&path, yes)?;
        }
        Commands::Version => {
            println!("HeartSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("HeartSync Core v{}", heartsync_core::VERSION);
        }
    }

    Ok(())
}

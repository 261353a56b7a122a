//! vmctl - inspect and maintain a vmstore checkpoint database
//!
//! Subcommands:
//! - `vmctl list` - List checkpoint names
//! - `vmctl show <name>` - Component roots and raw field sizes of a checkpoint
//! - `vmctl delete <name>` - Delete a checkpoint and reclaim what it owned
//! - `vmctl stats` - Record, checkpoint and reference totals
//! - `vmctl verify` - Check every reference count; exits 1 on findings

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "vmctl")]
#[command(about = "Inspect and maintain a vmstore checkpoint database")]
#[command(version)]
struct Cli {
    /// TOML config file with a [store] section
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config and VMSTORE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log filter (overrides config; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List checkpoint names
    List,

    /// Show the component roots of a checkpoint
    Show {
        /// Checkpoint name
        name: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a checkpoint, releasing its component roots
    Delete {
        /// Checkpoint name
        name: String,
    },

    /// Print store totals
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recompute every reference count and report inconsistencies
    Verify {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref(), cli.db)?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    // only delete writes
    let writable = matches!(cli.command, Commands::Delete { .. });
    let store = commands::open_store(&config, writable)?;

    match cli.command {
        Commands::List => commands::list(&store)?,
        Commands::Show { name, json } => commands::show(&store, &name, json)?,
        Commands::Delete { name } => commands::delete(&store, &name)?,
        Commands::Stats { json } => commands::stats(&store, json)?,
        Commands::Verify { json } => {
            if !commands::verify(&store, json)? {
                return Ok(ExitCode::from(1));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

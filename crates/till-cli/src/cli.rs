//! CLI argument definitions using clap
//!
//! This module contains the clap structs and enums for parsing CLI
//! arguments. The command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Till - offline-first POS terminal core
#[derive(Parser)]
#[command(name = "till")]
#[command(about = "Offline-first data and sync core for POS terminals", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and data directory
    Init,

    /// Start the gateway server with monitor and sync engine
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "4736")]
        port: u16,

        /// Host to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bearer token required on gateway requests
        #[arg(long, env = "TILL_GATEWAY_TOKEN")]
        token: Option<String>,
    },

    /// Show pairing, network, queue, and sync state
    Status {
        /// Emit machine-readable JSON instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Bind this terminal to a tenant and location
    Pair {
        #[arg(long)]
        terminal: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        location: String,
        /// Signing secret issued by the backend
        #[arg(long)]
        secret: String,
        /// API key for the sync loops
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Clear the pairing and the stored API key
    Unpair,

    /// Run one sync tick (delta pull + queue drain) and exit
    Sync,

    /// Manage database backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
pub enum BackupAction {
    /// Create a backup now
    Create {
        /// Optional backup name (defaults to a timestamped name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List available backups
    List,
    /// Restore a backup over the database (terminal must not be serving)
    Restore {
        /// Backup file name
        name: String,
        /// Overwrite an existing database
        #[arg(long)]
        force: bool,
    },
    /// Delete old backups beyond the retention policy
    Prune {
        /// How many backups to keep
        #[arg(long)]
        keep: Option<usize>,
    },
}

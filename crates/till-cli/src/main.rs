//! Till CLI - offline-first POS terminal core
//!
//! Usage:
//!   till init                 Initialize the database
//!   till pair --terminal ...  Bind the terminal to a tenant/location
//!   till serve --port 4736    Start the gateway with monitor and sync
//!   till status               Show pairing/network/queue/sync state
//!   till backup create        Create a backup

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.data_dir.clone());

    match cli.command {
        Commands::Init => commands::cmd_init(&config),
        Commands::Serve { port, host, token } => {
            commands::cmd_serve(config, &host, port, token).await
        }
        Commands::Status { json } => commands::cmd_status(&config, json),
        Commands::Pair {
            terminal,
            tenant,
            location,
            secret,
            api_key,
        } => commands::cmd_pair(&config, &terminal, &tenant, &location, &secret, api_key.as_deref()),
        Commands::Unpair => commands::cmd_unpair(&config),
        Commands::Sync => commands::cmd_sync(config).await,
        Commands::Backup { action } => match action {
            BackupAction::Create { name } => commands::cmd_backup_create(&config, name.as_deref()),
            BackupAction::List => commands::cmd_backup_list(&config),
            BackupAction::Restore { name, force } => {
                commands::cmd_backup_restore(&config, &name, force)
            }
            BackupAction::Prune { keep } => commands::cmd_backup_prune(&config, keep),
        },
    }
}

//! Background maintenance scheduler
//!
//! Two periodic jobs run alongside the gateway:
//! - scheduled backups with retention pruning
//! - the purge sweep that deletes SENT operations past the retention window

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use till_core::{CoreConfig, Database};

/// How often the purge sweep runs.
const PURGE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configuration for the maintenance jobs
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub backup_interval: Duration,
    pub backups_dir: PathBuf,
    pub max_backups_to_keep: usize,
    pub backup_retention_days: i64,
    pub sent_operation_retention_days: i64,
}

impl MaintenanceConfig {
    pub fn from_core_config(config: &CoreConfig) -> Self {
        Self {
            backup_interval: Duration::from_secs(config.backup_interval_minutes * 60),
            backups_dir: config.backups_dir(),
            max_backups_to_keep: config.max_backups_to_keep,
            backup_retention_days: config.backup_retention_days,
            sent_operation_retention_days: config.sent_operation_retention_days,
        }
    }
}

/// Start the maintenance jobs as background tasks
pub fn start_maintenance_scheduler(db: Database, config: MaintenanceConfig) {
    info!(
        "Starting maintenance scheduler: backup every {} min, keeping {} backups, purging SENT after {} days",
        config.backup_interval.as_secs() / 60,
        config.max_backups_to_keep,
        config.sent_operation_retention_days,
    );

    {
        let db = db.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let mut ticker = interval(config.backup_interval);
            // Skip the immediate first tick; no point backing up a database
            // that just opened.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match run_scheduled_backup(&db, &config) {
                    Ok(name) => info!("Scheduled backup completed: {}", name),
                    Err(e) => error!("Scheduled backup failed: {}", e),
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut ticker = interval(PURGE_SWEEP_INTERVAL);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match db.purge_sent_operations(config.sent_operation_retention_days) {
                Ok(0) => {}
                Ok(n) => info!("Purge sweep removed {} sent operation(s)", n),
                Err(e) => error!("Purge sweep failed: {}", e),
            }
        }
    });
}

/// Run a single scheduled backup, then prune old ones.
fn run_scheduled_backup(db: &Database, config: &MaintenanceConfig) -> Result<String, String> {
    let info = db
        .create_backup(&config.backups_dir, None)
        .map_err(|e| format!("Failed to create backup: {}", e))?;

    match till_core::prune_backups(
        &config.backups_dir,
        config.max_backups_to_keep,
        config.backup_retention_days,
    ) {
        Ok(result) if result.deleted_count > 0 => {
            info!(
                "Pruned {} old backup(s), freed {} bytes",
                result.deleted_count, result.bytes_freed
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to prune old backups: {}", e),
    }

    Ok(info.name)
}

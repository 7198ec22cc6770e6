//! Database backups using SQLite's online backup API
//!
//! Backups snapshot the live database page-by-page without blocking
//! writers, landing as timestamped `.db.bak` files under the backups
//! directory. A retention sweep keeps the newest N and drops files past the
//! age window. Restore is also the corruption-recovery path at startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::backup::Backup;
use rusqlite::Connection;
use tracing::{info, warn};

use super::Database;
use crate::error::{Error, Result};

/// Pages copied per backup step; the pause between steps lets writers in.
const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 64;
const BACKUP_STEP_PAUSE: Duration = Duration::from_millis(25);

const BACKUP_PREFIX: &str = "offline-pos-";
const BACKUP_SUFFIX: &str = ".db.bak";
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// One backup file on disk
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackupInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// What a retention sweep removed
#[derive(Debug, Clone, serde::Serialize)]
pub struct PruneResult {
    pub deleted_count: usize,
    pub retained_count: usize,
    pub bytes_freed: u64,
}

/// Timestamped backup file name, filesystem-safe on every platform.
pub fn generate_backup_name() -> String {
    format!(
        "{}{}{}",
        BACKUP_PREFIX,
        Utc::now().format(BACKUP_TIME_FORMAT),
        BACKUP_SUFFIX
    )
}

/// Recover the creation time from a backup file name.
fn parse_backup_time(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// List backup files, newest first.
pub fn list_backups(backups_dir: &Path) -> Result<Vec<BackupInfo>> {
    let mut backups = Vec::new();

    if !backups_dir.exists() {
        return Ok(backups);
    }

    for entry in fs::read_dir(backups_dir)? {
        let entry = entry?;
        let path = entry.path();

        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX) => {
                name.to_string()
            }
            _ => continue,
        };

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let created_at = parse_backup_time(&file_name).unwrap_or_else(Utc::now);
        backups.push(BackupInfo {
            name: file_name,
            path: path.to_string_lossy().to_string(),
            size: metadata.len(),
            created_at,
        });
    }

    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(backups)
}

/// Copy a backup over `target_path`, clearing WAL sidecar files so SQLite
/// does not replay stale journal pages on the restored copy.
pub fn restore_backup(backups_dir: &Path, name: &str, target_path: &Path, force: bool) -> Result<()> {
    let source = backups_dir.join(name);
    if !source.exists() {
        return Err(Error::Backup(format!("Backup not found: {}", source.display())));
    }

    if target_path.exists() {
        if !force {
            return Err(Error::Backup(format!(
                "Database already exists at {}. Use force=true to overwrite.",
                target_path.display()
            )));
        }
        fs::remove_file(target_path)
            .map_err(|e| Error::Backup(format!("Failed to remove existing database: {}", e)))?;
    }

    for suffix in ["-wal", "-shm"] {
        let mut sidecar = target_path.as_os_str().to_owned();
        sidecar.push(suffix);
        let _ = fs::remove_file(PathBuf::from(sidecar));
    }

    fs::copy(&source, target_path)?;
    info!("Restored backup {} to {}", name, target_path.display());
    Ok(())
}

/// Restore the most recent backup (the single recovery attempt after a
/// corruption verdict).
pub(crate) fn restore_latest(backups_dir: &Path, target_path: &Path) -> Result<()> {
    let newest = list_backups(backups_dir)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Backup("no backup available for recovery".to_string()))?;
    restore_backup(backups_dir, &newest.name, target_path, true)
}

/// Keep the newest `keep` backups and drop anything older than
/// `max_age_days`.
pub fn prune_backups(backups_dir: &Path, keep: usize, max_age_days: i64) -> Result<PruneResult> {
    let backups = list_backups(backups_dir)?;
    let age_cutoff = Utc::now() - chrono::Duration::days(max_age_days);

    let mut deleted_count = 0usize;
    let mut bytes_freed = 0u64;

    for (index, backup) in backups.iter().enumerate() {
        if index < keep && backup.created_at >= age_cutoff {
            continue;
        }
        match fs::remove_file(&backup.path) {
            Ok(()) => {
                deleted_count += 1;
                bytes_freed += backup.size;
            }
            Err(e) => warn!("Failed to delete backup {}: {}", backup.name, e),
        }
    }

    Ok(PruneResult {
        deleted_count,
        retained_count: backups.len() - deleted_count,
        bytes_freed,
    })
}

impl Database {
    /// Snapshot the live database to a timestamped file under
    /// `backups_dir` without blocking writers.
    pub fn create_backup(&self, backups_dir: &Path, name: Option<&str>) -> Result<BackupInfo> {
        if !backups_dir.exists() {
            fs::create_dir_all(backups_dir).map_err(|e| {
                Error::Backup(format!(
                    "Failed to create backup directory {}: {}",
                    backups_dir.display(),
                    e
                ))
            })?;
        }

        let name = name.map(String::from).unwrap_or_else(generate_backup_name);
        let dest_path = backups_dir.join(&name);
        if dest_path.exists() {
            return Err(Error::Backup(format!(
                "Backup already exists: {}",
                dest_path.display()
            )));
        }

        // Stage into a temp file in the same directory so the final rename
        // is atomic and a crashed backup never looks complete.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempfile_in(backups_dir)
            .map_err(|e| Error::Backup(format!("Failed to create staging file: {}", e)))?;

        {
            let src = self.conn()?;
            let mut dst = Connection::open(staging.path())
                .map_err(|e| Error::Backup(format!("Failed to open staging database: {}", e)))?;
            let backup = Backup::new(&src, &mut dst)
                .map_err(|e| Error::Backup(format!("Failed to start backup: {}", e)))?;
            backup
                .run_to_completion(BACKUP_PAGES_PER_STEP, BACKUP_STEP_PAUSE, None)
                .map_err(|e| Error::Backup(format!("Backup copy failed: {}", e)))?;
        }

        staging
            .persist(&dest_path)
            .map_err(|e| Error::Backup(format!("Failed to persist backup: {}", e)))?;

        let size = fs::metadata(&dest_path)?.len();
        info!("Backup complete: {} ({} bytes)", name, size);

        Ok(BackupInfo {
            created_at: parse_backup_time(&name).unwrap_or_else(Utc::now),
            path: dest_path.to_string_lossy().to_string(),
            name,
            size,
        })
    }
}

//! Backup command implementations

use anyhow::Result;

use till_core::CoreConfig;

use super::open_db;

pub fn cmd_backup_create(config: &CoreConfig, name: Option<&str>) -> Result<()> {
    let db = open_db(config)?;
    let info = db.create_backup(&config.backups_dir(), name)?;
    println!("✅ Backup created: {} ({} bytes)", info.name, info.size);
    Ok(())
}

pub fn cmd_backup_list(config: &CoreConfig) -> Result<()> {
    let backups = till_core::list_backups(&config.backups_dir())?;
    if backups.is_empty() {
        println!("No backups in {}", config.backups_dir().display());
        return Ok(());
    }

    println!("{:<48} {:>12}  created", "name", "size");
    for backup in backups {
        println!(
            "{:<48} {:>12}  {}",
            backup.name,
            backup.size,
            backup.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

pub fn cmd_backup_restore(config: &CoreConfig, name: &str, force: bool) -> Result<()> {
    till_core::restore_backup(&config.backups_dir(), name, &config.db_path(), force)?;
    println!("✅ Restored {} to {}", name, config.db_path().display());
    Ok(())
}

pub fn cmd_backup_prune(config: &CoreConfig, keep: Option<usize>) -> Result<()> {
    let keep = keep.unwrap_or(config.max_backups_to_keep);
    let result =
        till_core::prune_backups(&config.backups_dir(), keep, config.backup_retention_days)?;
    println!(
        "✅ Pruned {} backup(s), freed {} bytes, {} retained",
        result.deleted_count, result.bytes_freed, result.retained_count
    );
    Ok(())
}

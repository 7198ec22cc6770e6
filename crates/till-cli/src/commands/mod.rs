//! Command implementations

mod backup;
mod serve;
mod status;
mod sync;

pub use backup::{cmd_backup_create, cmd_backup_list, cmd_backup_prune, cmd_backup_restore};
pub use serve::cmd_serve;
pub use status::cmd_status;
pub use sync::cmd_sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use till_core::models::PairingInfo;
use till_core::{CoreConfig, Database};

/// Load the terminal configuration, honoring a --data-dir override.
pub fn load_config(data_dir: Option<PathBuf>) -> CoreConfig {
    let mut config = CoreConfig::load_or_default();
    if data_dir.is_some() {
        config.data_dir = data_dir;
    }
    config
}

/// Open the database with the single backup-recovery attempt.
pub fn open_db(config: &CoreConfig) -> Result<Database> {
    let (db, recovered) = Database::open_with_recovery(&config.db_path(), &config.backups_dir())
        .with_context(|| format!("opening database at {}", config.db_path().display()))?;
    if recovered {
        println!("⚠️  Database was restored from the most recent backup");
    }
    Ok(db)
}

pub fn cmd_init(config: &CoreConfig) -> Result<()> {
    let db = open_db(config)?;
    println!("✅ Database ready at {}", db.path().display());
    println!("   Backups: {}", config.backups_dir().display());
    println!("   Images:  {}", config.images_dir().display());
    Ok(())
}

pub fn cmd_pair(
    config: &CoreConfig,
    terminal: &str,
    tenant: &str,
    location: &str,
    secret: &str,
    api_key: Option<&str>,
) -> Result<()> {
    let db = open_db(config)?;
    db.store_pairing(&PairingInfo {
        terminal_id: terminal.to_string(),
        tenant_id: tenant.to_string(),
        location_id: location.to_string(),
        signing_secret: secret.to_string(),
        paired_at: Utc::now(),
    })?;
    if let Some(key) = api_key {
        db.set_api_key(key)?;
    }
    println!("✅ Paired terminal {} to {}/{}", terminal, tenant, location);
    Ok(())
}

pub fn cmd_unpair(config: &CoreConfig) -> Result<()> {
    let db = open_db(config)?;
    db.clear_pairing()?;
    db.clear_api_key()?;
    println!("✅ Pairing cleared");
    Ok(())
}

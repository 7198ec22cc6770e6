//! Terminal configuration
//!
//! Options load from `<data dir>/till.toml` when present and fall back to
//! built-in defaults otherwise. Every option can also be set directly by the
//! host process before the core starts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Name of the primary database file under the data directory.
pub const DB_FILE_NAME: &str = "offline-pos.db";

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Base URL for health probes and sync calls.
    pub backend_url: String,
    /// Health probe cadence in milliseconds.
    pub health_probe_interval_ms: u64,
    /// Health probe timeout in milliseconds.
    pub health_probe_timeout_ms: u64,
    /// Consecutive failed probes before the terminal flips offline.
    pub consecutive_failures_to_offline: u32,
    /// Delta-pull cadence in minutes (clamped to 1..=60).
    pub sync_interval_minutes: u64,
    /// Whether the delta-pull loop runs at all.
    pub auto_sync_enabled: bool,
    /// Per-request timeout for sync calls in milliseconds.
    pub http_timeout_ms: u64,
    /// Backup cadence in minutes.
    pub backup_interval_minutes: u64,
    /// How many backup files to retain.
    pub max_backups_to_keep: usize,
    /// How many days backup files are retained regardless of count.
    pub backup_retention_days: i64,
    /// Age in days after which SENT operations are purged.
    pub sent_operation_retention_days: i64,
    /// Fallback per-transaction offline money cap (cached settings win).
    pub offline_transaction_cap: Option<f64>,
    /// Fallback aggregate offline money cap (cached settings win).
    pub offline_daily_cap: Option<f64>,
    /// Fallback offline transaction count cap (cached settings win).
    pub offline_transaction_count_cap: Option<i64>,
    /// Grace period for draining in-flight work at shutdown, milliseconds.
    pub shutdown_grace_ms: u64,
    /// Override for the data directory (defaults to the platform dir).
    pub data_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".to_string(),
            health_probe_interval_ms: 30_000,
            health_probe_timeout_ms: 5_000,
            consecutive_failures_to_offline: 3,
            sync_interval_minutes: 5,
            auto_sync_enabled: true,
            http_timeout_ms: 10_000,
            backup_interval_minutes: 30,
            max_backups_to_keep: 10,
            backup_retention_days: 7,
            sent_operation_retention_days: 7,
            offline_transaction_cap: None,
            offline_daily_cap: None,
            offline_transaction_count_cap: None,
            shutdown_grace_ms: 5_000,
            data_dir: None,
        }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config.normalized())
    }

    /// Load from `<data dir>/till.toml` if present, defaults otherwise.
    pub fn load_or_default() -> Self {
        let path = default_data_dir().join("till.toml");
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Ignoring unreadable config {}: {}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    /// Clamp out-of-range values into their documented ranges.
    pub fn normalized(mut self) -> Self {
        let clamped = self.sync_interval_minutes.clamp(1, 60);
        if clamped != self.sync_interval_minutes {
            warn!(
                "sync_interval_minutes {} outside 1..=60, using {}",
                self.sync_interval_minutes, clamped
            );
            self.sync_interval_minutes = clamped;
        }
        if self.consecutive_failures_to_offline == 0 {
            self.consecutive_failures_to_offline = 1;
        }
        self
    }

    /// The resolved data directory for this terminal.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Path of the primary database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(DB_FILE_NAME)
    }

    /// Directory holding rolling backups.
    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir().join("backups")
    }

    /// Directory holding cached product images.
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir().join("cached_images")
    }

    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_minutes * 60)
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.http_timeout_ms)
    }

    pub fn probe_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.health_probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.health_probe_timeout_ms)
    }
}

/// Platform data directory for the terminal
/// (`~/.local/share/till` on Linux, the equivalent elsewhere).
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("till")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let c = CoreConfig::default();
        assert_eq!(c.health_probe_interval_ms, 30_000);
        assert_eq!(c.health_probe_timeout_ms, 5_000);
        assert_eq!(c.consecutive_failures_to_offline, 3);
        assert_eq!(c.sync_interval_minutes, 5);
        assert_eq!(c.http_timeout_ms, 10_000);
        assert_eq!(c.backup_interval_minutes, 30);
        assert_eq!(c.max_backups_to_keep, 10);
        assert_eq!(c.sent_operation_retention_days, 7);
        assert!(c.auto_sync_enabled);
    }

    #[test]
    fn test_sync_interval_is_clamped() {
        let c = CoreConfig {
            sync_interval_minutes: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(c.sync_interval_minutes, 1);

        let c = CoreConfig {
            sync_interval_minutes: 240,
            ..Default::default()
        }
        .normalized();
        assert_eq!(c.sync_interval_minutes, 60);
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("till.toml");
        std::fs::write(
            &path,
            "backend_url = \"https://pos.example.com\"\nsync_interval_minutes = 10\n",
        )
        .unwrap();

        let c = CoreConfig::load(&path).unwrap();
        assert_eq!(c.backend_url, "https://pos.example.com");
        assert_eq!(c.sync_interval_minutes, 10);
        // Everything else keeps its default
        assert_eq!(c.max_backups_to_keep, 10);
    }
}

//! Till Core Library
//!
//! Offline-first data and synchronization core for the Till POS terminal:
//! - Embedded SQLite store with migrations, backups, and corruption recovery
//! - Reference-data cache keyed by dataset version (delta pulls)
//! - Durable operation queue with idempotent replay and conflict surfacing
//! - Terminal pairing, device signatures, and offline exposure limits
//! - Network health monitor with hysteresis
//! - Sync engine coordinating delta pulls and queue drains

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod images;
pub mod limits;
pub mod models;
pub mod monitor;
pub mod sync;

/// Test utilities including the mock backend server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{default_data_dir, CoreConfig};
pub use db::{
    hash_pin, list_backups, prune_backups, restore_backup, verify_pin, BackupInfo, CacheOutcome,
    Database, EnqueuedOrder, ExposureSnapshot, PruneResult, QueueStats,
};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
pub use limits::{ExposureGuard, LimitCheck};
pub use monitor::{spawn_monitor, MonitorHandle, ProbeState, ProbeTransition};
pub use sync::{
    spawn_engine, BackendClient, DrainReport, PullReport, SubmitOutcome, SyncHandle,
    SyncStatusReport, TickKind,
};

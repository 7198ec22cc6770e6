//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `datasets` - Dataset version cursors for delta pulls
//! - `catalog` - Products, categories, modifier sets, discounts, taxes,
//!   product types
//! - `inventory` - Inventory locations and stock levels
//! - `staff` - POS staff users and store settings
//! - `orders` - Offline orders, payments, approvals (atomic enqueue)
//! - `queue` - Pending operation state machine, purge, recovery
//! - `meta` - Device metadata, pairing, exposure counters
//! - `backup` - Online backups, restore, retention

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::{Error, Result};

mod backup;
mod catalog;
mod datasets;
mod inventory;
mod meta;
mod orders;
mod queue;
mod staff;

pub use backup::{
    generate_backup_name, list_backups, prune_backups, restore_backup, BackupInfo, PruneResult,
};
pub use datasets::CacheOutcome;
pub use meta::ExposureSnapshot;
pub use orders::EnqueuedOrder;
pub use queue::QueueStats;
pub use staff::{hash_pin, verify_pin};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Write the current instant the way every timestamp column stores it.
pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339()
}

/// Parse a stored datetime string into a DateTime<Utc>
///
/// Accepts RFC3339 (what we write) and SQLite's "YYYY-MM-DD HH:MM:SS"
/// (what CURRENT_TIMESTAMP defaults produce).
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open (or create) the terminal database at `path`.
    ///
    /// Refuses to open a file that exists but cannot be read. Runs an
    /// integrity check before migrations; a corrupt file surfaces as
    /// [`Error::Corruption`] so the caller can attempt a backup restore.
    pub fn open(path: &Path) -> Result<Self> {
        if path.exists() {
            // Surface permission problems before SQLite turns them into
            // less specific errors.
            std::fs::File::open(path)?;
            integrity_check(path)?;
        } else if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA foreign_keys = ON;
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA secure_delete = ON;
                PRAGMA cache_size = 2000;
                PRAGMA temp_store = MEMORY;
                "#,
            )
        });

        let pool = Pool::builder().max_size(10).build(manager)?;
        let db = Self {
            pool,
            db_path: path.to_string_lossy().to_string(),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open the database, attempting a single restore from the most recent
    /// backup if the file is corrupt.
    ///
    /// Returns the database and whether a restore happened. A second
    /// corruption after restoring is fatal.
    pub fn open_with_recovery(path: &Path, backups_dir: &Path) -> Result<(Self, bool)> {
        match Self::open(path) {
            Ok(db) => Ok((db, false)),
            Err(Error::Corruption(reason)) => {
                error!("Database corrupt ({}), attempting backup restore", reason);
                backup::restore_latest(backups_dir, path)?;
                let db = Self::open(path)?;
                warn!("Recovered database from backup after corruption");
                Ok((db, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Create a throwaway on-disk database (for testing).
    ///
    /// Uses a temporary file rather than `:memory:` so the connection pool
    /// sees one shared database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("till_test_{}_{}.db", std::process::id(), id));

        let _ = std::fs::remove_file(&path);
        Self::open(&path)
    }

    /// Get the path to the database file
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Reclaim free pages. Exposed through the gateway for maintenance.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("VACUUM;")?;
        info!("Database vacuum complete");
        Ok(())
    }

    /// Clear every reference dataset and its version cursor.
    ///
    /// Outbound state (queue, offline orders, device metadata) is never
    /// touched; the next sync repopulates the cache from scratch.
    pub fn clear_reference_cache(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            DELETE FROM inventory_stocks;
            DELETE FROM inventory_locations;
            DELETE FROM discounts;
            DELETE FROM products;
            DELETE FROM modifier_sets;
            DELETE FROM taxes;
            DELETE FROM product_types;
            DELETE FROM categories;
            DELETE FROM users;
            DELETE FROM settings;
            DELETE FROM datasets;
            "#,
        )?;
        info!("Reference cache cleared");
        Ok(())
    }

    /// Run database migrations
    ///
    /// Idempotent and additive: every statement is CREATE IF NOT EXISTS.
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Dataset version cursors (high-water marks for delta pulls)
            CREATE TABLE IF NOT EXISTS datasets (
                key TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                synced_at DATETIME NOT NULL,
                record_count INTEGER NOT NULL DEFAULT 0,
                deleted_count INTEGER NOT NULL DEFAULT 0
            );

            -- Categories (nested-set hierarchy, code-validated parents)
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id INTEGER,
                lft INTEGER NOT NULL DEFAULT 0,
                rght INTEGER NOT NULL DEFAULT 0,
                tree_id INTEGER NOT NULL DEFAULT 0,
                level INTEGER NOT NULL DEFAULT 0,
                display_order INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);

            CREATE TABLE IF NOT EXISTS product_types (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS taxes (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                rate REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS modifier_sets (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                selection_type TEXT NOT NULL DEFAULT 'single',
                min_selections INTEGER NOT NULL DEFAULT 0,
                max_selections INTEGER,
                triggered_by_option_id INTEGER,
                options TEXT NOT NULL DEFAULT '[]'
            );

            -- Products (cross-dataset references stay loose: the backend is
            -- authoritative and datasets converge eventually)
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY,
                tenant_id TEXT,
                product_type_id INTEGER,
                name TEXT NOT NULL,
                price REAL NOT NULL,
                category_id INTEGER,
                barcode TEXT,
                image_url TEXT,
                track_inventory BOOLEAN NOT NULL DEFAULT 0,
                has_modifiers BOOLEAN NOT NULL DEFAULT 0,
                is_public BOOLEAN NOT NULL DEFAULT 1,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                tax_ids TEXT NOT NULL DEFAULT '[]',
                modifier_groups TEXT NOT NULL DEFAULT '[]',
                updated_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_products_barcode ON products(barcode);
            CREATE INDEX IF NOT EXISTS idx_products_category ON products(category_id);
            CREATE INDEX IF NOT EXISTS idx_products_active ON products(is_active);

            CREATE TABLE IF NOT EXISTS discounts (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                scope TEXT NOT NULL,
                value REAL NOT NULL DEFAULT 0,
                code TEXT,
                start_date DATETIME,
                end_date DATETIME,
                min_purchase_amount REAL,
                buy_quantity INTEGER,
                get_quantity INTEGER,
                applicable_product_ids TEXT NOT NULL DEFAULT '[]',
                applicable_category_ids TEXT NOT NULL DEFAULT '[]',
                is_active BOOLEAN NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS inventory_locations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                is_default BOOLEAN NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS inventory_stocks (
                id INTEGER PRIMARY KEY,
                product_id INTEGER NOT NULL,
                location_id INTEGER NOT NULL,
                quantity REAL NOT NULL DEFAULT 0,
                low_stock_threshold REAL,
                updated_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_stocks_product ON inventory_stocks(product_id);

            -- POS staff with offline-verifiable PIN hashes
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                display_name TEXT,
                role TEXT,
                pin_hash TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1
            );

            -- Store settings rows (backend-owned JSON blobs)
            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY,
                data TEXT NOT NULL DEFAULT '{}',
                updated_at DATETIME
            );

            -- Offline orders captured before a server identity exists
            CREATE TABLE IF NOT EXISTS offline_orders (
                local_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'SYNCED', 'CONFLICT')),
                server_order_id TEXT,
                server_order_number TEXT,
                conflict_reason TEXT,
                created_at DATETIME NOT NULL,
                synced_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_offline_orders_status ON offline_orders(status);

            -- Durable write-ahead log of outbound mutations
            CREATE TABLE IF NOT EXISTS pending_operations (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL
                    CHECK (kind IN ('ORDER', 'INVENTORY', 'APPROVAL')),
                payload TEXT NOT NULL,
                local_order_id TEXT REFERENCES offline_orders(local_id),
                status TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'SENDING', 'SENT', 'FAILED')),
                retries INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                next_attempt_at DATETIME,
                signature TEXT,
                last_error TEXT,
                last_response TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_operations_status ON pending_operations(status);
            CREATE INDEX IF NOT EXISTS idx_operations_created ON pending_operations(created_at);
            CREATE INDEX IF NOT EXISTS idx_operations_order ON pending_operations(local_order_id);

            CREATE TABLE IF NOT EXISTS offline_payments (
                id INTEGER PRIMARY KEY,
                local_order_id TEXT NOT NULL
                    REFERENCES offline_orders(local_id) ON DELETE CASCADE,
                method TEXT NOT NULL
                    CHECK (method IN ('CASH', 'CARD_TERMINAL', 'GIFT_CARD')),
                amount REAL NOT NULL,
                tip REAL NOT NULL DEFAULT 0,
                surcharge REAL NOT NULL DEFAULT 0,
                provider_transaction_id TEXT,
                cash_tendered REAL,
                cash_change REAL,
                created_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_payments_order ON offline_payments(local_order_id);

            CREATE TABLE IF NOT EXISTS offline_approvals (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL
                    CHECK (kind IN ('discount', 'void', 'refund', 'price_override')),
                manager_pin_hash TEXT NOT NULL,
                local_order_id TEXT REFERENCES offline_orders(local_id),
                reference TEXT,
                value REAL,
                synced BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_approvals_synced ON offline_approvals(synced);

            -- Device metadata (single-row-per-key semantics)
            CREATE TABLE IF NOT EXISTS device_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .map_err(|e| Error::Migration(e.to_string()))?;

        info!("Database schema initialized");
        Ok(())
    }
}

/// Verify an existing database file before the pool touches it.
///
/// Runs `PRAGMA quick_check` over a throwaway connection so a damaged file
/// surfaces as [`Error::Corruption`] rather than a pool failure.
fn integrity_check(path: &Path) -> Result<()> {
    let conn = rusqlite::Connection::open(path).map_err(|e| Error::Corruption(e.to_string()))?;
    let verdict: String = conn
        .query_row("PRAGMA quick_check;", [], |row| row.get(0))
        .map_err(|e| Error::Corruption(e.to_string()))?;
    if verdict != "ok" {
        return Err(Error::Corruption(verdict));
    }
    Ok(())
}

#[cfg(test)]
mod tests;

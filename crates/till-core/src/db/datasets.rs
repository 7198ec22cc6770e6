//! Dataset version cursors and the cache-dataset entry point
//!
//! Every reference-dataset write goes through [`Database::cache_dataset`]:
//! one transaction upserts the rows, applies explicit deletions, and
//! advances the `(key, version)` high-water mark. A version older than the
//! stored one is rejected without touching rows or cursor.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::DateTime;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::{now_str, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    Category, DatasetKey, DatasetVersion, Discount, InventoryLocation, InventoryStock,
    ModifierSet, Product, ProductType, StaffUser, StoreSettings, Tax,
};

/// Result of one cache-dataset call
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheOutcome {
    pub key: String,
    pub version: String,
    /// False when the submitted version was older than the stored one.
    pub applied: bool,
    pub upserted: usize,
    pub deleted: usize,
    /// Category ids skipped because their parent is missing, with the
    /// missing parent id.
    pub skipped_orphans: Vec<(i64, i64)>,
}

/// Compare two dataset version markers.
///
/// Versions are usually ISO-8601 timestamps; numeric markers and plain
/// strings are handled so a backend change of scheme does not wedge sync.
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    if let (Ok(ta), Ok(tb)) = (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
        return ta.cmp(&tb);
    }
    if let (Ok(na), Ok(nb)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return na.partial_cmp(&nb).unwrap_or(Ordering::Equal);
    }
    a.cmp(b)
}

fn parse_rows<T: DeserializeOwned>(key: DatasetKey, rows: &[serde_json::Value]) -> Vec<T> {
    let mut parsed = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<T>(row.clone()) {
            Ok(value) => parsed.push(value),
            Err(e) => warn!(dataset = %key, "Skipping malformed row: {}", e),
        }
    }
    parsed
}

impl Database {
    /// Upsert rows and apply deletions for one dataset, advancing its
    /// version cursor, all in a single transaction.
    ///
    /// `version` is mandatory; an empty marker is rejected with
    /// [`Error::DatasetVersionRequired`]. A marker older than the stored
    /// one is refused with a warning and `applied = false`.
    pub fn cache_dataset(
        &self,
        key: DatasetKey,
        rows: &[serde_json::Value],
        deleted_ids: &[i64],
        version: &str,
    ) -> Result<CacheOutcome> {
        if version.trim().is_empty() {
            return Err(Error::DatasetVersionRequired(key.as_str().to_string()));
        }

        // Tenancy back-fill source; read before the write transaction.
        let tenant_id = self.get_meta(super::meta::META_TENANT_ID)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(stored) = current_version(&tx, key)? {
            if compare_versions(version, &stored) == Ordering::Less {
                warn!(
                    dataset = %key,
                    stored = %stored,
                    submitted = %version,
                    "Rejecting stale dataset version"
                );
                return Ok(CacheOutcome {
                    key: key.as_str().to_string(),
                    version: stored,
                    applied: false,
                    upserted: 0,
                    deleted: 0,
                    skipped_orphans: Vec::new(),
                });
            }
        }

        let mut skipped_orphans = Vec::new();
        let upserted = match key {
            DatasetKey::Categories => {
                let parsed: Vec<Category> = parse_rows(key, rows);
                let (inserted, orphans) = super::catalog::upsert_categories_tx(&tx, &parsed)?;
                skipped_orphans = orphans;
                inserted
            }
            DatasetKey::ProductTypes => {
                let parsed: Vec<ProductType> = parse_rows(key, rows);
                super::catalog::upsert_product_types_tx(&tx, &parsed)?
            }
            DatasetKey::Taxes => {
                let parsed: Vec<Tax> = parse_rows(key, rows);
                super::catalog::upsert_taxes_tx(&tx, &parsed)?
            }
            DatasetKey::ModifierSets => {
                let parsed: Vec<ModifierSet> = parse_rows(key, rows);
                super::catalog::upsert_modifier_sets_tx(&tx, &parsed)?
            }
            DatasetKey::Users => {
                let parsed: Vec<StaffUser> = parse_rows(key, rows);
                super::staff::upsert_users_tx(&tx, &parsed)?
            }
            DatasetKey::Products => {
                let parsed: Vec<Product> = parse_rows(key, rows);
                super::catalog::upsert_products_tx(&tx, &parsed, tenant_id.as_deref())?
            }
            DatasetKey::Discounts => {
                let parsed: Vec<Discount> = parse_rows(key, rows);
                super::catalog::upsert_discounts_tx(&tx, &parsed)?
            }
            DatasetKey::InventoryLocations => {
                let parsed: Vec<InventoryLocation> = parse_rows(key, rows);
                super::inventory::upsert_locations_tx(&tx, &parsed)?
            }
            DatasetKey::InventoryStocks => {
                let parsed: Vec<InventoryStock> = parse_rows(key, rows);
                super::inventory::upsert_stocks_tx(&tx, &parsed)?
            }
            DatasetKey::Settings => {
                let parsed: Vec<StoreSettings> = parse_rows(key, rows);
                super::staff::upsert_settings_tx(&tx, &parsed)?
            }
        };

        let deleted = delete_by_ids(&tx, key, deleted_ids)?;

        tx.execute(
            r#"
            INSERT INTO datasets (key, version, synced_at, record_count, deleted_count)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                version = excluded.version,
                synced_at = excluded.synced_at,
                record_count = excluded.record_count,
                deleted_count = excluded.deleted_count
            "#,
            params![
                key.as_str(),
                version,
                now_str(),
                upserted as i64,
                deleted as i64
            ],
        )?;

        tx.commit()?;

        info!(
            dataset = %key,
            version = %version,
            upserted,
            deleted,
            "Dataset cached"
        );

        Ok(CacheOutcome {
            key: key.as_str().to_string(),
            version: version.to_string(),
            applied: true,
            upserted,
            deleted,
            skipped_orphans,
        })
    }

    /// Delete reference rows by id outside a pull (gateway `delete-records`).
    pub fn delete_records(&self, key: DatasetKey, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let deleted = delete_by_ids(&tx, key, ids)?;
        tx.commit()?;
        Ok(deleted)
    }

    /// The stored version for one dataset, if any.
    pub fn dataset_version(&self, key: DatasetKey) -> Result<Option<DatasetVersion>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT key, version, synced_at, record_count, deleted_count
             FROM datasets WHERE key = ?",
            params![key.as_str()],
            |row| {
                Ok(DatasetVersion {
                    key: row.get(0)?,
                    version: row.get(1)?,
                    synced_at: parse_datetime(&row.get::<_, String>(2)?),
                    record_count: row.get(3)?,
                    deleted_count: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// The `(key -> version)` map the sync engine uses as modified_since
    /// cursors.
    pub fn dataset_versions(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, version FROM datasets")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, version) = row?;
            map.insert(key, version);
        }
        Ok(map)
    }
}

fn current_version(tx: &rusqlite::Transaction<'_>, key: DatasetKey) -> Result<Option<String>> {
    tx.query_row(
        "SELECT version FROM datasets WHERE key = ?",
        params![key.as_str()],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

fn delete_by_ids(
    tx: &rusqlite::Transaction<'_>,
    key: DatasetKey,
    ids: &[i64],
) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
    let sql = format!(
        "DELETE FROM {} WHERE id IN ({})",
        key.table(),
        placeholders.join(", ")
    );

    let mut stmt = tx.prepare(&sql)?;
    let deleted = stmt.execute(rusqlite::params_from_iter(ids.iter()))?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_iso_timestamps() {
        assert_eq!(
            compare_versions("2024-01-02T00:00:00Z", "2024-01-01T00:00:00Z"),
            Ordering::Greater
        );
        assert_eq!(
            compare_versions("2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z"),
            Ordering::Equal
        );
    }

    #[test]
    fn test_compare_numeric_versions() {
        assert_eq!(compare_versions("10", "9"), Ordering::Greater);
        assert_eq!(compare_versions("2", "10"), Ordering::Less);
    }

    #[test]
    fn test_version_required() {
        let db = Database::in_memory().unwrap();
        let err = db
            .cache_dataset(DatasetKey::Products, &[], &[], "  ")
            .unwrap_err();
        assert!(matches!(err, Error::DatasetVersionRequired(_)));
    }

    #[test]
    fn test_version_monotonicity() {
        let db = Database::in_memory().unwrap();

        let row = serde_json::json!({"id": 1, "name": "Espresso", "price": 3.0});
        db.cache_dataset(
            DatasetKey::Products,
            &[row.clone()],
            &[],
            "2024-02-01T00:00:00Z",
        )
        .unwrap();

        // An older marker is refused and the cursor stays put
        let outcome = db
            .cache_dataset(DatasetKey::Products, &[row], &[], "2024-01-01T00:00:00Z")
            .unwrap();
        assert!(!outcome.applied);

        let stored = db.dataset_version(DatasetKey::Products).unwrap().unwrap();
        assert_eq!(stored.version, "2024-02-01T00:00:00Z");
    }

    #[test]
    fn test_versions_map_reports_all_keys() {
        let db = Database::in_memory().unwrap();
        db.cache_dataset(DatasetKey::Taxes, &[], &[], "1").unwrap();
        db.cache_dataset(DatasetKey::Products, &[], &[], "2").unwrap();

        let map = db.dataset_versions().unwrap();
        assert_eq!(map.get("taxes").map(String::as_str), Some("1"));
        assert_eq!(map.get("products").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_explicit_deletes_only() {
        let db = Database::in_memory().unwrap();
        let rows = vec![
            serde_json::json!({"id": 1, "name": "A", "price": 1.0}),
            serde_json::json!({"id": 2, "name": "B", "price": 2.0}),
        ];
        db.cache_dataset(DatasetKey::Products, &rows, &[], "1").unwrap();

        // A later pull with fewer rows does not garbage-collect
        let rows = vec![serde_json::json!({"id": 1, "name": "A", "price": 1.5})];
        db.cache_dataset(DatasetKey::Products, &rows, &[], "2").unwrap();
        assert_eq!(db.list_products(None, false).unwrap().len(), 2);

        // Explicit deleted_ids do
        let outcome = db
            .cache_dataset(DatasetKey::Products, &[], &[2], "3")
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(db.list_products(None, false).unwrap().len(), 1);
    }
}

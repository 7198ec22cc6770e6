//! Inventory cache operations

use rusqlite::{params, OptionalExtension, Transaction};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{InventoryLocation, InventoryStock};

pub(crate) fn upsert_locations_tx(
    tx: &Transaction<'_>,
    rows: &[InventoryLocation],
) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO inventory_locations (id, name, is_default)
        VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            is_default = excluded.is_default
        "#,
    )?;
    for l in rows {
        stmt.execute(params![l.id, l.name, l.is_default])?;
    }
    Ok(rows.len())
}

pub(crate) fn upsert_stocks_tx(tx: &Transaction<'_>, rows: &[InventoryStock]) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO inventory_stocks (
            id, product_id, location_id, quantity, low_stock_threshold, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            product_id = excluded.product_id,
            location_id = excluded.location_id,
            quantity = excluded.quantity,
            low_stock_threshold = excluded.low_stock_threshold,
            updated_at = excluded.updated_at
        "#,
    )?;
    for s in rows {
        stmt.execute(params![
            s.id,
            s.product_id,
            s.location_id,
            s.quantity,
            s.low_stock_threshold,
            s.updated_at.map(|t| t.to_rfc3339()),
        ])?;
    }
    Ok(rows.len())
}

fn stock_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InventoryStock> {
    Ok(InventoryStock {
        id: row.get(0)?,
        product_id: row.get(1)?,
        location_id: row.get(2)?,
        quantity: row.get(3)?,
        low_stock_threshold: row.get(4)?,
        updated_at: row
            .get::<_, Option<String>>(5)?
            .map(|s| parse_datetime(&s)),
    })
}

impl Database {
    pub fn list_inventory_locations(&self) -> Result<Vec<InventoryLocation>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, is_default FROM inventory_locations ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(InventoryLocation {
                id: row.get(0)?,
                name: row.get(1)?,
                is_default: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn list_inventory_stocks(&self, location_id: Option<i64>) -> Result<Vec<InventoryStock>> {
        let conn = self.conn()?;
        let (sql, binds): (&str, Vec<i64>) = match location_id {
            Some(l) => (
                "SELECT id, product_id, location_id, quantity, low_stock_threshold, updated_at
                 FROM inventory_stocks WHERE location_id = ? ORDER BY product_id",
                vec![l],
            ),
            None => (
                "SELECT id, product_id, location_id, quantity, low_stock_threshold, updated_at
                 FROM inventory_stocks ORDER BY product_id",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), stock_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Stock level of one product across all locations.
    pub fn get_product_stock(&self, product_id: i64) -> Result<Vec<InventoryStock>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, product_id, location_id, quantity, low_stock_threshold, updated_at
             FROM inventory_stocks WHERE product_id = ? ORDER BY location_id",
        )?;
        let rows = stmt.query_map(params![product_id], stock_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// The default inventory location, if the backend marked one.
    pub fn default_inventory_location(&self) -> Result<Option<InventoryLocation>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, is_default FROM inventory_locations WHERE is_default = 1 LIMIT 1",
            [],
            |row| {
                Ok(InventoryLocation {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    is_default: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasetKey;

    #[test]
    fn test_stock_upsert_and_lookup() {
        let db = Database::in_memory().unwrap();
        db.cache_dataset(
            DatasetKey::InventoryLocations,
            &[serde_json::json!({"id": 1, "name": "Front bar", "is_default": true})],
            &[],
            "1",
        )
        .unwrap();
        db.cache_dataset(
            DatasetKey::InventoryStocks,
            &[
                serde_json::json!({"id": 1, "product_id": 10, "location_id": 1, "quantity": 24.0}),
                serde_json::json!({"id": 2, "product_id": 11, "location_id": 1, "quantity": 3.0}),
            ],
            &[],
            "1",
        )
        .unwrap();

        let stock = db.get_product_stock(10).unwrap();
        assert_eq!(stock.len(), 1);
        assert!((stock[0].quantity - 24.0).abs() < 1e-9);

        let default = db.default_inventory_location().unwrap().unwrap();
        assert_eq!(default.name, "Front bar");
    }
}

//! Catalog cache operations
//!
//! Products, categories, modifier sets, discounts, taxes, and product
//! types. Upserts run inside the caller's transaction (one per
//! cache-dataset call); queries serve the UI read path.

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension, Transaction};
use tracing::warn;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{
    Category, Discount, ModifierSet, Product, ProductType, SelectionType, Tax,
};

pub(crate) fn upsert_products_tx(
    tx: &Transaction<'_>,
    rows: &[Product],
    fallback_tenant: Option<&str>,
) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO products (
            id, tenant_id, product_type_id, name, price, category_id, barcode,
            image_url, track_inventory, has_modifiers, is_public, is_active,
            tax_ids, modifier_groups, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            tenant_id = excluded.tenant_id,
            product_type_id = excluded.product_type_id,
            name = excluded.name,
            price = excluded.price,
            category_id = excluded.category_id,
            barcode = excluded.barcode,
            image_url = excluded.image_url,
            track_inventory = excluded.track_inventory,
            has_modifiers = excluded.has_modifiers,
            is_public = excluded.is_public,
            is_active = excluded.is_active,
            tax_ids = excluded.tax_ids,
            modifier_groups = excluded.modifier_groups,
            updated_at = excluded.updated_at
        "#,
    )?;

    for p in rows {
        // Back-fill tenancy from pairing; foreign tenants pass through.
        let tenant = p
            .tenant_id
            .as_deref()
            .or(fallback_tenant)
            .map(str::to_string);
        stmt.execute(params![
            p.id,
            tenant,
            p.product_type_id,
            p.name,
            p.price,
            p.category_id,
            p.barcode,
            p.image_url,
            p.track_inventory,
            p.has_modifiers,
            p.is_public,
            p.is_active,
            serde_json::to_string(&p.tax_ids)?,
            serde_json::to_string(&p.modifier_groups)?,
            p.updated_at.map(|t| t.to_rfc3339()),
        ])?;
    }
    Ok(rows.len())
}

/// Hierarchy-aware category upsert.
///
/// Inserts parents before children over multiple passes. Rows whose parent
/// exists neither in the table nor in this batch are verified orphans:
/// skipped with a log naming the missing parent. A pass that makes no
/// progress stops the loop, which also covers reference cycles.
///
/// Returns `(upserted, skipped)` where skipped pairs are
/// `(category_id, missing_parent_id)`.
pub(crate) fn upsert_categories_tx(
    tx: &Transaction<'_>,
    rows: &[Category],
) -> Result<(usize, Vec<(i64, i64)>)> {
    let mut known: HashSet<i64> = {
        let mut stmt = tx.prepare("SELECT id FROM categories")?;
        let ids = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        ids.collect::<std::result::Result<_, _>>()?
    };

    let mut stmt = tx.prepare(
        r#"
        INSERT INTO categories (id, name, parent_id, lft, rght, tree_id, level, display_order)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            parent_id = excluded.parent_id,
            lft = excluded.lft,
            rght = excluded.rght,
            tree_id = excluded.tree_id,
            level = excluded.level,
            display_order = excluded.display_order
        "#,
    )?;

    let mut upserted = 0usize;
    let mut remaining: Vec<&Category> = rows.iter().collect();

    loop {
        let mut deferred = Vec::new();
        let mut progressed = false;

        for c in remaining {
            let parent_known = match c.parent_id {
                None => true,
                Some(p) => known.contains(&p),
            };
            if parent_known {
                stmt.execute(params![
                    c.id,
                    c.name,
                    c.parent_id,
                    c.lft,
                    c.rght,
                    c.tree_id,
                    c.level,
                    c.display_order,
                ])?;
                known.insert(c.id);
                upserted += 1;
                progressed = true;
            } else {
                deferred.push(c);
            }
        }

        if deferred.is_empty() {
            return Ok((upserted, Vec::new()));
        }
        if !progressed {
            let skipped: Vec<(i64, i64)> = deferred
                .iter()
                .map(|c| (c.id, c.parent_id.unwrap_or(0)))
                .collect();
            for (id, parent) in &skipped {
                warn!(
                    category = id,
                    missing_parent = parent,
                    "Skipping orphan category: parent not in snapshot"
                );
            }
            return Ok((upserted, skipped));
        }
        remaining = deferred;
    }
}

pub(crate) fn upsert_modifier_sets_tx(tx: &Transaction<'_>, rows: &[ModifierSet]) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO modifier_sets (
            id, name, selection_type, min_selections, max_selections,
            triggered_by_option_id, options
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            selection_type = excluded.selection_type,
            min_selections = excluded.min_selections,
            max_selections = excluded.max_selections,
            triggered_by_option_id = excluded.triggered_by_option_id,
            options = excluded.options
        "#,
    )?;

    for m in rows {
        stmt.execute(params![
            m.id,
            m.name,
            m.selection_type.as_str(),
            m.min_selections,
            m.max_selections,
            m.triggered_by_option_id,
            serde_json::to_string(&m.options)?,
        ])?;
    }
    Ok(rows.len())
}

pub(crate) fn upsert_discounts_tx(tx: &Transaction<'_>, rows: &[Discount]) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO discounts (
            id, name, kind, scope, value, code, start_date, end_date,
            min_purchase_amount, buy_quantity, get_quantity,
            applicable_product_ids, applicable_category_ids, is_active
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            kind = excluded.kind,
            scope = excluded.scope,
            value = excluded.value,
            code = excluded.code,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            min_purchase_amount = excluded.min_purchase_amount,
            buy_quantity = excluded.buy_quantity,
            get_quantity = excluded.get_quantity,
            applicable_product_ids = excluded.applicable_product_ids,
            applicable_category_ids = excluded.applicable_category_ids,
            is_active = excluded.is_active
        "#,
    )?;

    for d in rows {
        stmt.execute(params![
            d.id,
            d.name,
            d.kind.as_str(),
            d.scope.as_str(),
            d.value,
            d.code,
            d.start_date.map(|t| t.to_rfc3339()),
            d.end_date.map(|t| t.to_rfc3339()),
            d.min_purchase_amount,
            d.buy_quantity,
            d.get_quantity,
            serde_json::to_string(&d.applicable_product_ids)?,
            serde_json::to_string(&d.applicable_category_ids)?,
            d.is_active,
        ])?;
    }
    Ok(rows.len())
}

pub(crate) fn upsert_taxes_tx(tx: &Transaction<'_>, rows: &[Tax]) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO taxes (id, name, rate)
        VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET name = excluded.name, rate = excluded.rate
        "#,
    )?;
    for t in rows {
        stmt.execute(params![t.id, t.name, t.rate])?;
    }
    Ok(rows.len())
}

pub(crate) fn upsert_product_types_tx(tx: &Transaction<'_>, rows: &[ProductType]) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO product_types (id, name)
        VALUES (?, ?)
        ON CONFLICT(id) DO UPDATE SET name = excluded.name
        "#,
    )?;
    for t in rows {
        stmt.execute(params![t.id, t.name])?;
    }
    Ok(rows.len())
}

fn product_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    let tax_ids: String = row.get(12)?;
    let modifier_groups: String = row.get(13)?;
    Ok(Product {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        product_type_id: row.get(2)?,
        name: row.get(3)?,
        price: row.get(4)?,
        category_id: row.get(5)?,
        barcode: row.get(6)?,
        image_url: row.get(7)?,
        track_inventory: row.get(8)?,
        has_modifiers: row.get(9)?,
        is_public: row.get(10)?,
        is_active: row.get(11)?,
        tax_ids: serde_json::from_str(&tax_ids).unwrap_or_default(),
        modifier_groups: serde_json::from_str(&modifier_groups)
            .unwrap_or(serde_json::Value::Null),
        updated_at: row
            .get::<_, Option<String>>(14)?
            .map(|s| parse_datetime(&s)),
    })
}

const PRODUCT_COLUMNS: &str = "id, tenant_id, product_type_id, name, price, category_id, barcode, \
     image_url, track_inventory, has_modifiers, is_public, is_active, \
     tax_ids, modifier_groups, updated_at";

impl Database {
    /// List cached products, optionally filtered by category and active
    /// state.
    pub fn list_products(&self, category_id: Option<i64>, active_only: bool) -> Result<Vec<Product>> {
        let conn = self.conn()?;

        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(cid) = category_id {
            conditions.push("category_id = ?");
            params.push(Box::new(cid));
        }
        if active_only {
            conditions.push("is_active = 1");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM products {} ORDER BY name",
            PRODUCT_COLUMNS, where_clause
        );
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(&param_refs[..], product_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS);
        conn.query_row(&sql, params![id], product_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Barcode scan path.
    pub fn get_product_by_barcode(&self, barcode: &str) -> Result<Option<Product>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM products WHERE barcode = ? AND is_active = 1",
            PRODUCT_COLUMNS
        );
        conn.query_row(&sql, params![barcode], product_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// List categories in tree order.
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, parent_id, lft, rght, tree_id, level, display_order
             FROM categories
             ORDER BY tree_id, lft, display_order",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                parent_id: row.get(2)?,
                lft: row.get(3)?,
                rght: row.get(4)?,
                tree_id: row.get(5)?,
                level: row.get(6)?,
                display_order: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn list_modifier_sets(&self) -> Result<Vec<ModifierSet>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, selection_type, min_selections, max_selections,
                    triggered_by_option_id, options
             FROM modifier_sets ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let selection: String = row.get(2)?;
            let options: String = row.get(6)?;
            Ok(ModifierSet {
                id: row.get(0)?,
                name: row.get(1)?,
                selection_type: selection.parse().unwrap_or(SelectionType::Single),
                min_selections: row.get(3)?,
                max_selections: row.get(4)?,
                triggered_by_option_id: row.get(5)?,
                options: serde_json::from_str(&options).unwrap_or(serde_json::Value::Null),
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn list_discounts(&self, active_only: bool) -> Result<Vec<Discount>> {
        let conn = self.conn()?;
        let sql = if active_only {
            "SELECT id, name, kind, scope, value, code, start_date, end_date,
                    min_purchase_amount, buy_quantity, get_quantity,
                    applicable_product_ids, applicable_category_ids, is_active
             FROM discounts WHERE is_active = 1 ORDER BY name"
        } else {
            "SELECT id, name, kind, scope, value, code, start_date, end_date,
                    min_purchase_amount, buy_quantity, get_quantity,
                    applicable_product_ids, applicable_category_ids, is_active
             FROM discounts ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(2)?;
            let scope: String = row.get(3)?;
            let product_ids: String = row.get(11)?;
            let category_ids: String = row.get(12)?;
            Ok(Discount {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: kind.parse().unwrap_or(crate::models::DiscountKind::Fixed),
                scope: scope.parse().unwrap_or(crate::models::DiscountScope::Order),
                value: row.get(4)?,
                code: row.get(5)?,
                start_date: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
                end_date: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
                min_purchase_amount: row.get(8)?,
                buy_quantity: row.get(9)?,
                get_quantity: row.get(10)?,
                applicable_product_ids: serde_json::from_str(&product_ids).unwrap_or_default(),
                applicable_category_ids: serde_json::from_str(&category_ids).unwrap_or_default(),
                is_active: row.get(13)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn list_taxes(&self) -> Result<Vec<Tax>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, rate FROM taxes ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Tax {
                id: row.get(0)?,
                name: row.get(1)?,
                rate: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn list_product_types(&self) -> Result<Vec<ProductType>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM product_types ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ProductType {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}

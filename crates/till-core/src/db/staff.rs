//! POS staff users and store settings

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use rusqlite::{params, OptionalExtension, Transaction};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{OfflineLimits, StaffUser, StoreSettings};

/// Hash a PIN with Argon2id for offline verification.
pub fn hash_pin(pin: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| Error::InvalidData(format!("Failed to hash PIN: {}", e)))?;
    Ok(hash.to_string())
}

/// Verify a PIN against a stored Argon2 hash.
pub fn verify_pin(pin: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub(crate) fn upsert_users_tx(tx: &Transaction<'_>, rows: &[StaffUser]) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO users (id, username, display_name, role, pin_hash, is_active)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            username = excluded.username,
            display_name = excluded.display_name,
            role = excluded.role,
            pin_hash = excluded.pin_hash,
            is_active = excluded.is_active
        "#,
    )?;
    for u in rows {
        stmt.execute(params![
            u.id,
            u.username,
            u.display_name,
            u.role,
            u.pin_hash,
            u.is_active,
        ])?;
    }
    Ok(rows.len())
}

pub(crate) fn upsert_settings_tx(tx: &Transaction<'_>, rows: &[StoreSettings]) -> Result<usize> {
    let mut stmt = tx.prepare(
        r#"
        INSERT INTO settings (id, data, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
    )?;
    for s in rows {
        stmt.execute(params![
            s.id,
            serde_json::to_string(&s.data)?,
            s.updated_at.map(|t| t.to_rfc3339()),
        ])?;
    }
    Ok(rows.len())
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StaffUser> {
    Ok(StaffUser {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        role: row.get(3)?,
        pin_hash: row.get(4)?,
        is_active: row.get(5)?,
    })
}

/// Pick the first present numeric field out of a settings blob.
fn limit_field(data: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|k| data.get(k))
        .and_then(|v| v.as_f64())
}

impl Database {
    pub fn list_users(&self, active_only: bool) -> Result<Vec<StaffUser>> {
        let conn = self.conn()?;
        let sql = if active_only {
            "SELECT id, username, display_name, role, pin_hash, is_active
             FROM users WHERE is_active = 1 ORDER BY username"
        } else {
            "SELECT id, username, display_name, role, pin_hash, is_active
             FROM users ORDER BY username"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], user_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<StaffUser>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, username, display_name, role, pin_hash, is_active
             FROM users WHERE username = ?",
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Verify a staff PIN while offline.
    ///
    /// Returns the user on success, None on unknown user, wrong PIN, or a
    /// user without a synced PIN hash.
    pub fn verify_user_pin(&self, username: &str, pin: &str) -> Result<Option<StaffUser>> {
        let user = match self.get_user_by_username(username)? {
            Some(u) if u.is_active => u,
            _ => return Ok(None),
        };
        match user.pin_hash.as_deref() {
            Some(hash) if verify_pin(pin, hash) => Ok(Some(user)),
            _ => Ok(None),
        }
    }

    /// The store settings row (the backend sends exactly one per location).
    pub fn store_settings(&self) -> Result<Option<StoreSettings>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, data, updated_at FROM settings ORDER BY id LIMIT 1",
            [],
            |row| {
                let data: String = row.get(1)?;
                Ok(StoreSettings {
                    id: row.get(0)?,
                    data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                    updated_at: row
                        .get::<_, Option<String>>(2)?
                        .map(|s| parse_datetime(&s)),
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Offline exposure caps from cached settings, if present.
    pub fn settings_offline_limits(&self) -> Result<OfflineLimits> {
        let Some(settings) = self.store_settings()? else {
            return Ok(OfflineLimits::default());
        };
        let data = &settings.data;
        Ok(OfflineLimits {
            transaction_cap: limit_field(data, &["offline_transaction_cap", "offlineTransactionCap"]),
            daily_cap: limit_field(data, &["offline_daily_cap", "offlineDailyCap"]),
            transaction_count_cap: limit_field(
                data,
                &["offline_transaction_count_cap", "offlineTransactionCountCap"],
            )
            .map(|v| v as i64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasetKey;

    #[test]
    fn test_pin_hash_round_trip() {
        let hash = hash_pin("4821").unwrap();
        assert!(verify_pin("4821", &hash));
        assert!(!verify_pin("0000", &hash));
    }

    #[test]
    fn test_verify_user_pin() {
        let db = Database::in_memory().unwrap();
        let hash = hash_pin("1234").unwrap();
        db.cache_dataset(
            DatasetKey::Users,
            &[serde_json::json!({
                "id": 1, "username": "ana", "role": "manager", "pin_hash": hash
            })],
            &[],
            "1",
        )
        .unwrap();

        assert!(db.verify_user_pin("ana", "1234").unwrap().is_some());
        assert!(db.verify_user_pin("ana", "9999").unwrap().is_none());
        assert!(db.verify_user_pin("bob", "1234").unwrap().is_none());
    }

    #[test]
    fn test_offline_limits_from_settings() {
        let db = Database::in_memory().unwrap();
        db.cache_dataset(
            DatasetKey::Settings,
            &[serde_json::json!({
                "id": 1,
                "data": {
                    "offline_transaction_cap": 50.0,
                    "offline_daily_cap": 500.0,
                    "offline_transaction_count_cap": 25
                }
            })],
            &[],
            "1",
        )
        .unwrap();

        let limits = db.settings_offline_limits().unwrap();
        assert_eq!(limits.transaction_cap, Some(50.0));
        assert_eq!(limits.daily_cap, Some(500.0));
        assert_eq!(limits.transaction_count_cap, Some(25));
    }

    #[test]
    fn test_missing_settings_yield_no_limits() {
        let db = Database::in_memory().unwrap();
        let limits = db.settings_offline_limits().unwrap();
        assert_eq!(limits.transaction_cap, None);
    }
}

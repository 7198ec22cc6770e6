//! Device metadata: pairing, exposure counters, network and sync clocks
//!
//! A small key/value table with single-row-per-key semantics. Pairing and
//! counter updates are transactional so the invariants (all-or-nothing
//! pairing, monotonic counters) hold across crashes.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use tracing::info;

use super::{now_str, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{NetworkStatus, PairingInfo, PaymentMethod};

pub(crate) const META_TERMINAL_ID: &str = "terminal_id";
pub(crate) const META_TENANT_ID: &str = "tenant_id";
pub(crate) const META_LOCATION_ID: &str = "location_id";
pub(crate) const META_SIGNING_SECRET: &str = "signing_secret";
pub(crate) const META_PAIRED_AT: &str = "paired_at";
pub(crate) const META_API_KEY: &str = "api_key";
pub(crate) const META_NETWORK_STATUS: &str = "network_status";
pub(crate) const META_OFFLINE_SINCE: &str = "offline_since";
pub(crate) const META_TXN_COUNT: &str = "offline_transaction_count";
pub(crate) const META_CASH_TOTAL: &str = "offline_cash_total";
pub(crate) const META_CARD_TOTAL: &str = "offline_card_total";
pub(crate) const META_LAST_SYNC_ATTEMPT: &str = "last_sync_attempt";
pub(crate) const META_LAST_SYNC_SUCCESS: &str = "last_sync_success";

/// Point-in-time view of the offline exposure counters
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExposureSnapshot {
    pub transaction_count: i64,
    pub cash_total: f64,
    pub card_total: f64,
    pub offline_since: Option<DateTime<Utc>>,
    /// Seconds offline so far, when currently offline.
    pub offline_seconds: Option<i64>,
}

fn set_meta_tx(tx: &Transaction<'_>, key: &str, value: &str) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO device_meta (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![key, value, now_str()],
    )?;
    Ok(())
}

fn get_meta_tx(tx: &Transaction<'_>, key: &str) -> Result<Option<String>> {
    tx.query_row(
        "SELECT value FROM device_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

impl Database {
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM device_meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        set_meta_tx(&tx, key, value)?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_meta(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM device_meta WHERE key = ?", params![key])?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Pairing
    // -----------------------------------------------------------------

    /// Bind the terminal to a tenant/location. All five keys are written in
    /// one transaction.
    pub fn store_pairing(&self, pairing: &PairingInfo) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        set_meta_tx(&tx, META_TERMINAL_ID, &pairing.terminal_id)?;
        set_meta_tx(&tx, META_TENANT_ID, &pairing.tenant_id)?;
        set_meta_tx(&tx, META_LOCATION_ID, &pairing.location_id)?;
        set_meta_tx(&tx, META_SIGNING_SECRET, &pairing.signing_secret)?;
        set_meta_tx(&tx, META_PAIRED_AT, &pairing.paired_at.to_rfc3339())?;
        tx.commit()?;
        info!(terminal = %pairing.terminal_id, "Terminal paired");
        Ok(())
    }

    pub fn get_pairing(&self) -> Result<Option<PairingInfo>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let terminal_id = get_meta_tx(&tx, META_TERMINAL_ID)?;
        let tenant_id = get_meta_tx(&tx, META_TENANT_ID)?;
        let location_id = get_meta_tx(&tx, META_LOCATION_ID)?;
        let signing_secret = get_meta_tx(&tx, META_SIGNING_SECRET)?;
        let paired_at = get_meta_tx(&tx, META_PAIRED_AT)?;

        match (terminal_id, tenant_id, location_id, signing_secret) {
            (Some(terminal_id), Some(tenant_id), Some(location_id), Some(signing_secret)) => {
                Ok(Some(PairingInfo {
                    terminal_id,
                    tenant_id,
                    location_id,
                    signing_secret,
                    paired_at: paired_at
                        .map(|s| parse_datetime(&s))
                        .unwrap_or_else(Utc::now),
                }))
            }
            _ => Ok(None),
        }
    }

    /// Remove all pairing keys in one transaction.
    pub fn clear_pairing(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for key in [
            META_TERMINAL_ID,
            META_TENANT_ID,
            META_LOCATION_ID,
            META_SIGNING_SECRET,
            META_PAIRED_AT,
        ] {
            tx.execute("DELETE FROM device_meta WHERE key = ?", params![key])?;
        }
        tx.commit()?;
        info!("Pairing cleared");
        Ok(())
    }

    pub fn is_paired(&self) -> Result<bool> {
        Ok(self.get_pairing()?.is_some())
    }

    /// The pairing, or [`Error::NotPaired`] when the terminal is unbound.
    pub fn require_pairing(&self) -> Result<PairingInfo> {
        self.get_pairing()?
            .ok_or_else(|| Error::NotPaired("terminal has no stored pairing".to_string()))
    }

    // -----------------------------------------------------------------
    // API key
    // -----------------------------------------------------------------

    pub fn get_api_key(&self) -> Result<Option<String>> {
        self.get_meta(META_API_KEY)
    }

    pub fn set_api_key(&self, key: &str) -> Result<()> {
        self.set_meta(META_API_KEY, key)
    }

    pub fn clear_api_key(&self) -> Result<()> {
        self.delete_meta(META_API_KEY)
    }

    // -----------------------------------------------------------------
    // Network clock
    // -----------------------------------------------------------------

    /// Record a network-state transition.
    ///
    /// Going offline stamps `offline_since`; coming back online clears it.
    /// Returns the previous status.
    pub fn set_network_status(&self, status: NetworkStatus) -> Result<NetworkStatus> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let previous = get_meta_tx(&tx, META_NETWORK_STATUS)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(NetworkStatus::Unknown);

        set_meta_tx(&tx, META_NETWORK_STATUS, status.as_str())?;
        match (previous, status) {
            (NetworkStatus::Offline, NetworkStatus::Offline) => {}
            (_, NetworkStatus::Offline) => {
                set_meta_tx(&tx, META_OFFLINE_SINCE, &now_str())?;
            }
            (_, NetworkStatus::Online) => {
                tx.execute(
                    "DELETE FROM device_meta WHERE key = ?",
                    params![META_OFFLINE_SINCE],
                )?;
            }
            _ => {}
        }

        tx.commit()?;
        Ok(previous)
    }

    pub fn network_status(&self) -> Result<NetworkStatus> {
        Ok(self
            .get_meta(META_NETWORK_STATUS)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(NetworkStatus::Unknown))
    }

    pub fn offline_since(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get_meta(META_OFFLINE_SINCE)?.map(|s| parse_datetime(&s)))
    }

    // -----------------------------------------------------------------
    // Exposure counters
    // -----------------------------------------------------------------

    /// Add one successful offline payment to the exposure counters.
    ///
    /// Called inside the enqueue transaction so the counters can never
    /// drift from the recorded payments.
    pub(crate) fn bump_exposure_tx(
        tx: &Transaction<'_>,
        method: PaymentMethod,
        exposure: f64,
    ) -> Result<()> {
        let count = get_meta_tx(tx, META_TXN_COUNT)?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        set_meta_tx(tx, META_TXN_COUNT, &(count + 1).to_string())?;

        let key = if method.is_card() {
            META_CARD_TOTAL
        } else {
            META_CASH_TOTAL
        };
        let total = get_meta_tx(tx, key)?
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        set_meta_tx(tx, key, &format!("{:.2}", total + exposure))?;
        Ok(())
    }

    pub fn exposure(&self) -> Result<ExposureSnapshot> {
        let transaction_count = self
            .get_meta(META_TXN_COUNT)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let cash_total = self
            .get_meta(META_CASH_TOTAL)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let card_total = self
            .get_meta(META_CARD_TOTAL)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let offline_since = self.offline_since()?;
        let offline_seconds = offline_since.map(|t| (Utc::now() - t).num_seconds());

        Ok(ExposureSnapshot {
            transaction_count,
            cash_total,
            card_total,
            offline_since,
            offline_seconds,
        })
    }

    /// Reset the exposure counters.
    ///
    /// Only allowed when every operation created before the reset point has
    /// reached SENT; returns false (leaving the counters untouched) when
    /// older work is still outstanding.
    pub fn reset_exposure(&self) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let outstanding: i64 = tx.query_row(
            "SELECT COUNT(*) FROM pending_operations
             WHERE created_at < ? AND status != 'SENT'",
            params![now_str()],
            |row| row.get(0),
        )?;
        if outstanding > 0 {
            return Ok(false);
        }

        set_meta_tx(&tx, META_TXN_COUNT, "0")?;
        set_meta_tx(&tx, META_CASH_TOTAL, "0.00")?;
        set_meta_tx(&tx, META_CARD_TOTAL, "0.00")?;
        tx.commit()?;
        info!("Offline exposure counters reset");
        Ok(true)
    }

    // -----------------------------------------------------------------
    // Sync clocks
    // -----------------------------------------------------------------

    pub fn record_sync_attempt(&self) -> Result<()> {
        self.set_meta(META_LAST_SYNC_ATTEMPT, &now_str())
    }

    pub fn record_sync_success(&self) -> Result<()> {
        self.set_meta(META_LAST_SYNC_SUCCESS, &now_str())
    }

    pub fn last_sync_attempt(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_meta(META_LAST_SYNC_ATTEMPT)?
            .map(|s| parse_datetime(&s)))
    }

    pub fn last_sync_success(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_meta(META_LAST_SYNC_SUCCESS)?
            .map(|s| parse_datetime(&s)))
    }
}

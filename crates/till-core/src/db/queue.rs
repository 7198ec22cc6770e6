//! Pending-operation state machine
//!
//! PENDING -> SENDING -> SENT | FAILED, with retryable failures returning
//! to PENDING. Draining respects per-order ordering: nothing for a local
//! order moves while an earlier operation of that order is not SENT.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

use super::{now_str, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Operation, OperationKind, OperationStatus};

/// Aggregate queue counters for the stats surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub sending: i64,
    pub sent: i64,
    pub failed: i64,
    pub conflicted_orders: i64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

const OPERATION_COLUMNS: &str = "id, kind, payload, local_order_id, status, retries, created_at, \
     updated_at, next_attempt_at, signature, last_error, last_response";

const KIND_RANK: &str = "CASE kind WHEN 'ORDER' THEN 0 WHEN 'INVENTORY' THEN 1 ELSE 2 END";

pub(crate) fn operation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Operation> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let local_order_id: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Operation {
        id: id.parse().unwrap_or_else(|_| Uuid::nil()),
        kind: kind.parse().unwrap_or(OperationKind::Order),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        local_order_id: local_order_id.and_then(|s| s.parse().ok()),
        status: status.parse().unwrap_or(OperationStatus::Pending),
        retries: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
        next_attempt_at: row
            .get::<_, Option<String>>(8)?
            .map(|s| parse_datetime(&s)),
        signature: row.get(9)?,
        last_error: row.get(10)?,
        last_response: row.get(11)?,
    })
}

impl Database {
    pub fn get_operation(&self, id: Uuid) -> Result<Option<Operation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM pending_operations WHERE id = ?",
            OPERATION_COLUMNS
        );
        conn.query_row(&sql, params![id.to_string()], operation_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// List operations, optionally filtered by status and local order.
    pub fn list_operations(
        &self,
        status: Option<OperationStatus>,
        local_order_id: Option<Uuid>,
    ) -> Result<Vec<Operation>> {
        let conn = self.conn()?;

        let mut conditions = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        if let Some(s) = status {
            conditions.push("status = ?");
            binds.push(s.as_str().to_string());
        }
        if let Some(id) = local_order_id {
            conditions.push("local_order_id = ?");
            binds.push(id.to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM pending_operations {} ORDER BY created_at, {}",
            OPERATION_COLUMNS, where_clause, KIND_RANK
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), operation_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// The next operation the drain worker may pick up.
    ///
    /// Oldest-first, gated on the per-order ordering rule and on any
    /// deferred next-attempt time. Orders parked mid-pass are excluded via
    /// `skip_orders`, stand-alone parked operations via `skip_ops`.
    pub fn next_drainable_operation(
        &self,
        skip_ops: &[Uuid],
        skip_orders: &[Uuid],
    ) -> Result<Option<Operation>> {
        let conn = self.conn()?;

        let mut sql = format!(
            r#"
            SELECT {cols} FROM pending_operations p
            WHERE p.status = 'PENDING'
              AND (p.next_attempt_at IS NULL OR p.next_attempt_at <= ?)
              AND (p.local_order_id IS NULL OR NOT EXISTS (
                  SELECT 1 FROM pending_operations q
                  WHERE q.local_order_id = p.local_order_id
                    AND q.id != p.id
                    AND q.status != 'SENT'
                    AND (q.created_at < p.created_at
                         OR (q.created_at = p.created_at
                             AND (CASE q.kind WHEN 'ORDER' THEN 0 WHEN 'INVENTORY' THEN 1 ELSE 2 END)
                               < (CASE p.kind WHEN 'ORDER' THEN 0 WHEN 'INVENTORY' THEN 1 ELSE 2 END)))
              ))
            "#,
            cols = OPERATION_COLUMNS
                .split(", ")
                .map(|c| format!("p.{}", c))
                .collect::<Vec<_>>()
                .join(", "),
        );

        let mut binds: Vec<String> = vec![now_str()];
        if !skip_ops.is_empty() {
            let placeholders: Vec<&str> = skip_ops.iter().map(|_| "?").collect();
            sql.push_str(&format!(" AND p.id NOT IN ({})", placeholders.join(", ")));
            binds.extend(skip_ops.iter().map(|u| u.to_string()));
        }
        if !skip_orders.is_empty() {
            let placeholders: Vec<&str> = skip_orders.iter().map(|_| "?").collect();
            sql.push_str(&format!(
                " AND (p.local_order_id IS NULL OR p.local_order_id NOT IN ({}))",
                placeholders.join(", ")
            ));
            binds.extend(skip_orders.iter().map(|u| u.to_string()));
        }

        sql.push_str(
            " ORDER BY p.created_at, CASE p.kind WHEN 'ORDER' THEN 0 WHEN 'INVENTORY' THEN 1 ELSE 2 END LIMIT 1",
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(
            rusqlite::params_from_iter(binds.iter()),
            operation_from_row,
        )?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn transition(&self, id: Uuid, from: &[OperationStatus], set_clause: &str, binds: &[&dyn rusqlite::ToSql]) -> Result<()> {
        let conn = self.conn()?;
        let from_list = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE pending_operations SET {} WHERE id = ? AND status IN ({})",
            set_clause, from_list
        );

        let mut all_binds: Vec<&dyn rusqlite::ToSql> = binds.to_vec();
        let id_str = id.to_string();
        all_binds.push(&id_str);
        let updated = conn.execute(&sql, &all_binds[..])?;
        if updated == 0 {
            return Err(Error::InvalidData(format!(
                "operation {} not in expected status for transition",
                id
            )));
        }
        Ok(())
    }

    /// PENDING -> SENDING when the drain worker picks an operation up.
    pub fn mark_operation_sending(&self, id: Uuid) -> Result<()> {
        let now = now_str();
        self.transition(
            id,
            &[OperationStatus::Pending],
            "status = 'SENDING', updated_at = ?",
            &[&now],
        )
    }

    /// SENDING -> SENT on a 2xx from the backend.
    pub fn mark_operation_sent(&self, id: Uuid, response: Option<&str>) -> Result<()> {
        let now = now_str();
        self.transition(
            id,
            &[OperationStatus::Sending],
            "status = 'SENT', last_response = ?, last_error = NULL, next_attempt_at = NULL, updated_at = ?",
            &[&response, &now],
        )
    }

    /// SENDING -> PENDING after a retryable failure.
    pub fn mark_operation_retry(&self, id: Uuid, error: &str) -> Result<i64> {
        let now = now_str();
        self.transition(
            id,
            &[OperationStatus::Sending],
            "status = 'PENDING', retries = retries + 1, last_error = ?, updated_at = ?",
            &[&error, &now],
        )?;
        let op = self
            .get_operation(id)?
            .ok_or_else(|| Error::NotFound(format!("operation {}", id)))?;
        Ok(op.retries)
    }

    /// Park a retry-exhausted operation until the next scheduled tick.
    pub fn park_operation(&self, id: Uuid, error: &str, next_attempt_at: DateTime<Utc>) -> Result<()> {
        let now = now_str();
        let next = next_attempt_at.to_rfc3339();
        self.transition(
            id,
            &[OperationStatus::Pending, OperationStatus::Sending],
            "status = 'PENDING', retries = retries + 1, last_error = ?, next_attempt_at = ?, updated_at = ?",
            &[&error, &next, &now],
        )?;
        warn!(operation = %id, "Operation parked until next sync tick");
        Ok(())
    }

    /// SENDING -> FAILED on a permanent rejection. The server's error body
    /// is kept for the queue-management view.
    pub fn mark_operation_failed(&self, id: Uuid, error: &str, response: Option<&str>) -> Result<()> {
        let now = now_str();
        self.transition(
            id,
            &[OperationStatus::Sending, OperationStatus::Pending],
            "status = 'FAILED', last_error = ?, last_response = ?, updated_at = ?",
            &[&error, &response, &now],
        )
    }

    /// Reconciliation tooling: force a status without the normal guards.
    pub fn force_operation_status(&self, id: Uuid, status: OperationStatus) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE pending_operations SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), now_str(), id.to_string()],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("operation {}", id)));
        }
        warn!(operation = %id, status = %status, "Operation status forced");
        Ok(())
    }

    pub fn set_operation_signature(&self, id: Uuid, signature: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE pending_operations SET signature = ? WHERE id = ?",
            params![signature, id.to_string()],
        )?;
        Ok(())
    }

    /// Delete SENT operations older than the retention window. Nothing
    /// else is ever deleted automatically.
    pub fn purge_sent_operations(&self, retention_days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(retention_days)).to_rfc3339();
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM pending_operations WHERE status = 'SENT' AND created_at < ?",
            params![cutoff],
        )?;
        if deleted > 0 {
            info!(deleted, "Purged sent operations past retention");
        }
        Ok(deleted)
    }

    /// Startup recovery: anything stuck in SENDING for more than
    /// `older_than_minutes` was orphaned by a crash or shutdown and goes
    /// back to PENDING.
    pub fn recover_stuck_sending(&self, older_than_minutes: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::minutes(older_than_minutes)).to_rfc3339();
        let conn = self.conn()?;
        let recovered = conn.execute(
            "UPDATE pending_operations
             SET status = 'PENDING', updated_at = ?
             WHERE status = 'SENDING' AND updated_at < ?",
            params![now_str(), cutoff],
        )?;
        if recovered > 0 {
            warn!(recovered, "Recovered orphaned SENDING operations");
        }
        Ok(recovered)
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        let conn = self.conn()?;

        let mut stats = QueueStats {
            pending: 0,
            sending: 0,
            sent: 0,
            failed: 0,
            conflicted_orders: 0,
            oldest_pending_at: None,
        };

        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM pending_operations GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "PENDING" => stats.pending = count,
                "SENDING" => stats.sending = count,
                "SENT" => stats.sent = count,
                "FAILED" => stats.failed = count,
                _ => {}
            }
        }

        stats.conflicted_orders = conn.query_row(
            "SELECT COUNT(*) FROM offline_orders WHERE status = 'CONFLICT'",
            [],
            |row| row.get(0),
        )?;
        stats.oldest_pending_at = conn
            .query_row(
                "SELECT MIN(created_at) FROM pending_operations WHERE status = 'PENDING'",
                [],
                |row| row.get::<_, Option<String>>(0),
            )?
            .map(|s| parse_datetime(&s));

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOfflinePayment, PaymentMethod};

    fn cash(amount: f64) -> NewOfflinePayment {
        NewOfflinePayment {
            method: PaymentMethod::Cash,
            amount,
            tip: 0.0,
            surcharge: 0.0,
            provider_transaction_id: None,
            cash_tendered: None,
        }
    }

    #[test]
    fn test_state_machine_happy_path() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 1.0}), &[cash(1.0)])
            .unwrap();
        let id = enqueued.operation_id;

        db.mark_operation_sending(id).unwrap();
        assert_eq!(
            db.get_operation(id).unwrap().unwrap().status,
            OperationStatus::Sending
        );

        db.mark_operation_sent(id, Some(r#"{"order_number":"A-17"}"#))
            .unwrap();
        let op = db.get_operation(id).unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Sent);
        assert!(op.last_response.is_some());
    }

    #[test]
    fn test_retry_keeps_idempotency_key() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 1.0}), &[])
            .unwrap();
        let id = enqueued.operation_id;

        for expected_retries in 1..=3 {
            db.mark_operation_sending(id).unwrap();
            let retries = db.mark_operation_retry(id, "503 from backend").unwrap();
            assert_eq!(retries, expected_retries);
        }

        // Same row, same id, retry counter moved
        let op = db.get_operation(id).unwrap().unwrap();
        assert_eq!(op.id, id);
        assert_eq!(op.retries, 3);
        assert_eq!(op.status, OperationStatus::Pending);
    }

    #[test]
    fn test_double_pick_is_rejected() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({}), &[])
            .unwrap();
        db.mark_operation_sending(enqueued.operation_id).unwrap();
        assert!(db.mark_operation_sending(enqueued.operation_id).is_err());
    }

    #[test]
    fn test_drain_order_before_dependents() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 2.0}), &[])
            .unwrap();
        let order_op = enqueued.operation_id;
        db.queue_operation(
            crate::models::OperationKind::Inventory,
            serde_json::json!({"delta": -1}),
            Some(enqueued.local_order_id),
        )
        .unwrap();

        // While the order is not SENT, only the order op is drainable
        let next = db.next_drainable_operation(&[], &[]).unwrap().unwrap();
        assert_eq!(next.id, order_op);

        db.mark_operation_sending(order_op).unwrap();
        // Order now SENDING: the inventory op must still wait
        assert!(db.next_drainable_operation(&[], &[]).unwrap().is_none());

        db.mark_operation_sent(order_op, None).unwrap();
        let next = db.next_drainable_operation(&[], &[]).unwrap().unwrap();
        assert_eq!(next.kind, crate::models::OperationKind::Inventory);
    }

    #[test]
    fn test_independent_orders_do_not_block_each_other() {
        let db = Database::in_memory().unwrap();
        let first = db.record_order(serde_json::json!({"n": 1}), &[]).unwrap();
        let second = db.record_order(serde_json::json!({"n": 2}), &[]).unwrap();

        db.mark_operation_sending(first.operation_id).unwrap();
        // First order in flight, second order still drainable
        let next = db.next_drainable_operation(&[], &[]).unwrap().unwrap();
        assert_eq!(next.id, second.operation_id);
    }

    #[test]
    fn test_parked_operation_waits_for_deferral() {
        let db = Database::in_memory().unwrap();
        let enqueued = db.record_order(serde_json::json!({}), &[]).unwrap();

        db.park_operation(
            enqueued.operation_id,
            "too many attempts",
            Utc::now() + Duration::minutes(5),
        )
        .unwrap();
        assert!(db.next_drainable_operation(&[], &[]).unwrap().is_none());

        // A deferral in the past is drainable again
        db.park_operation(
            enqueued.operation_id,
            "too many attempts",
            Utc::now() - Duration::seconds(1),
        )
        .unwrap();
        assert!(db.next_drainable_operation(&[], &[]).unwrap().is_some());
    }

    #[test]
    fn test_purge_only_old_sent_rows() {
        let db = Database::in_memory().unwrap();
        let keep_sent = db.record_order(serde_json::json!({"n": 1}), &[]).unwrap();
        let keep_pending = db.record_order(serde_json::json!({"n": 2}), &[]).unwrap();
        let old_sent = db.record_order(serde_json::json!({"n": 3}), &[]).unwrap();

        db.mark_operation_sending(keep_sent.operation_id).unwrap();
        db.mark_operation_sent(keep_sent.operation_id, None).unwrap();
        db.mark_operation_sending(old_sent.operation_id).unwrap();
        db.mark_operation_sent(old_sent.operation_id, None).unwrap();

        // Age one SENT row past the window
        let conn = db.conn().unwrap();
        conn.execute(
            "UPDATE pending_operations SET created_at = ? WHERE id = ?",
            params![
                (Utc::now() - Duration::days(10)).to_rfc3339(),
                old_sent.operation_id.to_string()
            ],
        )
        .unwrap();
        // Age the pending row too: pending rows must survive regardless
        conn.execute(
            "UPDATE pending_operations SET created_at = ? WHERE id = ?",
            params![
                (Utc::now() - Duration::days(10)).to_rfc3339(),
                keep_pending.operation_id.to_string()
            ],
        )
        .unwrap();
        drop(conn);

        let purged = db.purge_sent_operations(7).unwrap();
        assert_eq!(purged, 1);
        assert!(db.get_operation(old_sent.operation_id).unwrap().is_none());
        assert!(db.get_operation(keep_sent.operation_id).unwrap().is_some());
        assert!(db.get_operation(keep_pending.operation_id).unwrap().is_some());
    }

    #[test]
    fn test_orphaned_sending_rows_recover() {
        let db = Database::in_memory().unwrap();
        let stuck = db.record_order(serde_json::json!({"n": 1}), &[]).unwrap();
        let fresh = db.record_order(serde_json::json!({"n": 2}), &[]).unwrap();

        db.mark_operation_sending(stuck.operation_id).unwrap();
        db.mark_operation_sending(fresh.operation_id).unwrap();

        // Only the row stuck for more than five minutes is recovered
        let conn = db.conn().unwrap();
        conn.execute(
            "UPDATE pending_operations SET updated_at = ? WHERE id = ?",
            params![
                (Utc::now() - Duration::minutes(10)).to_rfc3339(),
                stuck.operation_id.to_string()
            ],
        )
        .unwrap();
        drop(conn);

        let recovered = db.recover_stuck_sending(5).unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(
            db.get_operation(stuck.operation_id).unwrap().unwrap().status,
            OperationStatus::Pending
        );
        assert_eq!(
            db.get_operation(fresh.operation_id).unwrap().unwrap().status,
            OperationStatus::Sending
        );
    }

    #[test]
    fn test_queue_stats_counts() {
        let db = Database::in_memory().unwrap();
        let a = db.record_order(serde_json::json!({"n": 1}), &[]).unwrap();
        let _b = db.record_order(serde_json::json!({"n": 2}), &[]).unwrap();

        db.mark_operation_sending(a.operation_id).unwrap();
        db.mark_operation_failed(a.operation_id, "400", None).unwrap();
        db.mark_order_conflict(a.local_order_id, "stale_prices").unwrap();

        let stats = db.queue_stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.conflicted_orders, 1);
        assert!(stats.oldest_pending_at.is_some());
    }
}

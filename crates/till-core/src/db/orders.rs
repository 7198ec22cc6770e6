//! Offline orders, payments, and approvals
//!
//! Every business record is created in the same transaction as the queue
//! operation describing it; neither ever exists without the other. A
//! payment recorded against an order whose operation already left the
//! terminal is a caller bug and is rejected rather than emulated.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{now_str, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    ApprovalKind, NewOfflinePayment, OfflineApproval, OfflineOrder, OfflinePayment, Operation,
    OperationKind, OperationStatus, OrderSyncStatus,
};

/// What an order enqueue produced
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnqueuedOrder {
    pub local_order_id: Uuid,
    pub operation_id: Uuid,
    /// Change due across cash payments, when any tendered amount was given.
    pub change_due: Option<f64>,
}

pub(crate) fn insert_operation_tx(
    tx: &Transaction<'_>,
    id: Uuid,
    kind: OperationKind,
    payload: &serde_json::Value,
    local_order_id: Option<Uuid>,
) -> Result<()> {
    let now = now_str();
    tx.execute(
        r#"
        INSERT INTO pending_operations (id, kind, payload, local_order_id, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'PENDING', ?, ?)
        "#,
        params![
            id.to_string(),
            kind.as_str(),
            serde_json::to_string(payload)?,
            local_order_id.map(|u| u.to_string()),
            now,
            now,
        ],
    )?;
    Ok(())
}

fn insert_payment_tx(
    tx: &Transaction<'_>,
    local_order_id: Uuid,
    payment: &NewOfflinePayment,
) -> Result<i64> {
    tx.execute(
        r#"
        INSERT INTO offline_payments (
            local_order_id, method, amount, tip, surcharge,
            provider_transaction_id, cash_tendered, cash_change, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            local_order_id.to_string(),
            payment.method.as_str(),
            payment.amount,
            payment.tip,
            payment.surcharge,
            payment.provider_transaction_id,
            payment.cash_tendered,
            payment.cash_change(),
            now_str(),
        ],
    )?;
    Database::bump_exposure_tx(tx, payment.method, payment.exposure())?;
    Ok(tx.last_insert_rowid())
}

fn order_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OfflineOrder> {
    let local_id: String = row.get(0)?;
    let payload: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(OfflineOrder {
        local_id: local_id.parse().unwrap_or_else(|_| Uuid::nil()),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        status: status.parse().unwrap_or(OrderSyncStatus::Pending),
        server_order_id: row.get(3)?,
        server_order_number: row.get(4)?,
        conflict_reason: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        synced_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_datetime(&s)),
    })
}

const ORDER_COLUMNS: &str = "local_id, payload, status, server_order_id, server_order_number, \
     conflict_reason, created_at, synced_at";

impl Database {
    /// Capture an offline order together with its payments and the queue
    /// operation that will replay it, atomically.
    ///
    /// The order payload is stored as given, with the payment list embedded
    /// under `payments` so the backend receives one self-contained
    /// envelope. Exposure counters move in the same transaction.
    pub fn record_order(
        &self,
        payload: serde_json::Value,
        payments: &[NewOfflinePayment],
    ) -> Result<EnqueuedOrder> {
        let local_id = Uuid::new_v4();
        let operation_id = Uuid::new_v4();

        let mut envelope = payload;
        if let serde_json::Value::Object(ref mut map) = envelope {
            map.insert(
                "local_id".to_string(),
                serde_json::Value::String(local_id.to_string()),
            );
            map.insert("payments".to_string(), serde_json::to_value(payments)?);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO offline_orders (local_id, payload, status, created_at)
            VALUES (?, ?, 'PENDING', ?)
            "#,
            params![
                local_id.to_string(),
                serde_json::to_string(&envelope)?,
                now_str(),
            ],
        )?;

        let mut change_due = None;
        for payment in payments {
            insert_payment_tx(&tx, local_id, payment)?;
            if let Some(change) = payment.cash_change() {
                *change_due.get_or_insert(0.0) += change;
            }
        }

        insert_operation_tx(&tx, operation_id, OperationKind::Order, &envelope, Some(local_id))?;
        tx.commit()?;

        info!(order = %local_id, operation = %operation_id, "Offline order enqueued");

        Ok(EnqueuedOrder {
            local_order_id: local_id,
            operation_id,
            change_due,
        })
    }

    /// Attach a payment to an already-recorded pending order.
    ///
    /// The order's operation must still be PENDING on this terminal; once
    /// it has been handed to the backend the payment can no longer ride
    /// along, and the split call is rejected as a caller bug.
    pub fn record_payment(
        &self,
        local_order_id: Uuid,
        payment: &NewOfflinePayment,
    ) -> Result<OfflinePayment> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let op: Option<(String, String, String)> = tx
            .query_row(
                "SELECT id, status, payload FROM pending_operations
                 WHERE local_order_id = ? AND kind = 'ORDER'",
                params![local_order_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (op_id, op_status, op_payload) = op.ok_or_else(|| {
            Error::InvalidData(format!(
                "no recorded order {} to attach a payment to",
                local_order_id
            ))
        })?;

        if op_status != OperationStatus::Pending.as_str() {
            return Err(Error::InvalidData(format!(
                "order {} already left the terminal ({}); payment must be recorded with the order",
                local_order_id, op_status
            )));
        }

        let payment_id = insert_payment_tx(&tx, local_order_id, payment)?;

        // Keep the operation envelope self-contained: the payment joins the
        // embedded list before the order is drained.
        let mut envelope: serde_json::Value =
            serde_json::from_str(&op_payload).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(ref mut map) = envelope {
            let list = map
                .entry("payments".to_string())
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let serde_json::Value::Array(items) = list {
                items.push(serde_json::to_value(payment)?);
            }
        }
        tx.execute(
            "UPDATE pending_operations SET payload = ?, updated_at = ? WHERE id = ?",
            params![serde_json::to_string(&envelope)?, now_str(), op_id],
        )?;
        tx.execute(
            "UPDATE offline_orders SET payload = ? WHERE local_id = ?",
            params![
                serde_json::to_string(&envelope)?,
                local_order_id.to_string()
            ],
        )?;

        tx.commit()?;

        Ok(OfflinePayment {
            id: payment_id,
            local_order_id,
            method: payment.method,
            amount: payment.amount,
            tip: payment.tip,
            surcharge: payment.surcharge,
            provider_transaction_id: payment.provider_transaction_id.clone(),
            cash_tendered: payment.cash_tendered,
            cash_change: payment.cash_change(),
            created_at: Utc::now(),
        })
    }

    /// Record a manager override and its queue operation atomically.
    ///
    /// `manager_pin_hash` is the argon2 hash of the approving manager's
    /// PIN; raw PINs never reach storage.
    pub fn record_approval(
        &self,
        kind: ApprovalKind,
        manager_pin_hash: &str,
        local_order_id: Option<Uuid>,
        reference: Option<&str>,
        value: Option<f64>,
    ) -> Result<(i64, Uuid)> {
        let operation_id = Uuid::new_v4();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO offline_approvals (
                kind, manager_pin_hash, local_order_id, reference, value, synced, created_at
            )
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
            params![
                kind.as_str(),
                manager_pin_hash,
                local_order_id.map(|u| u.to_string()),
                reference,
                value,
                now_str(),
            ],
        )?;
        let approval_id = tx.last_insert_rowid();

        // The row id rides along so the drain worker can flag the approval
        // synced once the backend accepts the operation.
        let payload = serde_json::json!({
            "approval_id": approval_id,
            "kind": kind.as_str(),
            "local_order_id": local_order_id.map(|u| u.to_string()),
            "reference": reference,
            "value": value,
        });

        insert_operation_tx(&tx, operation_id, OperationKind::Approval, &payload, local_order_id)?;
        tx.commit()?;

        info!(approval = approval_id, operation = %operation_id, "Approval enqueued");
        Ok((approval_id, operation_id))
    }

    /// Generic enqueue for mutations that are their own business record.
    ///
    /// Only INVENTORY adjustments go through here; orders and approvals
    /// have dedicated entry points that create their business rows in the
    /// same transaction.
    pub fn queue_operation(
        &self,
        kind: OperationKind,
        payload: serde_json::Value,
        local_order_id: Option<Uuid>,
    ) -> Result<Uuid> {
        if kind != OperationKind::Inventory {
            return Err(Error::InvalidData(format!(
                "{} operations must be enqueued through their record call",
                kind
            )));
        }

        let operation_id = Uuid::new_v4();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_operation_tx(&tx, operation_id, kind, &payload, local_order_id)?;
        tx.commit()?;
        Ok(operation_id)
    }

    // -----------------------------------------------------------------
    // Queries and reconciliation
    // -----------------------------------------------------------------

    pub fn list_offline_orders(&self, status: Option<OrderSyncStatus>) -> Result<Vec<OfflineOrder>> {
        let conn = self.conn()?;
        let (sql, binds): (String, Vec<String>) = match status {
            Some(s) => (
                format!(
                    "SELECT {} FROM offline_orders WHERE status = ? ORDER BY created_at",
                    ORDER_COLUMNS
                ),
                vec![s.as_str().to_string()],
            ),
            None => (
                format!("SELECT {} FROM offline_orders ORDER BY created_at", ORDER_COLUMNS),
                vec![],
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), order_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn get_offline_order(&self, local_id: Uuid) -> Result<Option<OfflineOrder>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM offline_orders WHERE local_id = ?", ORDER_COLUMNS);
        conn.query_row(&sql, params![local_id.to_string()], order_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn list_order_payments(&self, local_id: Uuid) -> Result<Vec<OfflinePayment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, local_order_id, method, amount, tip, surcharge,
                    provider_transaction_id, cash_tendered, cash_change, created_at
             FROM offline_payments WHERE local_order_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![local_id.to_string()], |row| {
            let order_id: String = row.get(1)?;
            let method: String = row.get(2)?;
            Ok(OfflinePayment {
                id: row.get(0)?,
                local_order_id: order_id.parse().unwrap_or_else(|_| Uuid::nil()),
                method: method
                    .parse()
                    .unwrap_or(crate::models::PaymentMethod::Cash),
                amount: row.get(3)?,
                tip: row.get(4)?,
                surcharge: row.get(5)?,
                provider_transaction_id: row.get(6)?,
                cash_tendered: row.get(7)?,
                cash_change: row.get(8)?,
                created_at: parse_datetime(&row.get::<_, String>(9)?),
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn list_approvals(&self, synced: Option<bool>) -> Result<Vec<OfflineApproval>> {
        let conn = self.conn()?;
        let (sql, binds): (&str, Vec<i64>) = match synced {
            Some(flag) => (
                "SELECT id, kind, manager_pin_hash, local_order_id, reference, value, synced, created_at
                 FROM offline_approvals WHERE synced = ? ORDER BY created_at",
                vec![flag as i64],
            ),
            None => (
                "SELECT id, kind, manager_pin_hash, local_order_id, reference, value, synced, created_at
                 FROM offline_approvals ORDER BY created_at",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), |row| {
            let kind: String = row.get(1)?;
            let order_id: Option<String> = row.get(3)?;
            Ok(OfflineApproval {
                id: row.get(0)?,
                kind: kind.parse().unwrap_or(ApprovalKind::Discount),
                manager_pin_hash: row.get(2)?,
                local_order_id: order_id.and_then(|s| s.parse().ok()),
                reference: row.get(4)?,
                value: row.get(5)?,
                synced: row.get(6)?,
                created_at: parse_datetime(&row.get::<_, String>(7)?),
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// The ORDER-kind operation for a local order.
    pub fn operation_for_order(&self, local_id: Uuid) -> Result<Option<Operation>> {
        let ops = self.list_operations(None, Some(local_id))?;
        Ok(ops.into_iter().find(|op| op.kind == OperationKind::Order))
    }

    /// Attach the server identity after the backend accepted the order.
    pub fn mark_order_synced(
        &self,
        local_id: Uuid,
        server_order_id: Option<&str>,
        server_order_number: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE offline_orders
             SET status = 'SYNCED', server_order_id = ?, server_order_number = ?, synced_at = ?
             WHERE local_id = ?",
            params![
                server_order_id,
                server_order_number,
                now_str(),
                local_id.to_string()
            ],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("offline order {}", local_id)));
        }
        Ok(())
    }

    /// Park an order the backend permanently rejected. It stays visible in
    /// the queue view until a person resolves it.
    pub fn mark_order_conflict(&self, local_id: Uuid, reason: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE offline_orders SET status = 'CONFLICT', conflict_reason = ? WHERE local_id = ?",
            params![reason, local_id.to_string()],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("offline order {}", local_id)));
        }
        Ok(())
    }

    pub fn mark_approval_synced(&self, approval_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE offline_approvals SET synced = 1 WHERE id = ?",
            params![approval_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("offline approval {}", approval_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethod;

    fn cash(amount: f64, tendered: f64) -> NewOfflinePayment {
        NewOfflinePayment {
            method: PaymentMethod::Cash,
            amount,
            tip: 0.0,
            surcharge: 0.0,
            provider_transaction_id: None,
            cash_tendered: Some(tendered),
        }
    }

    #[test]
    fn test_atomic_enqueue_pairs_order_and_operation() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 10.85}), &[cash(10.85, 20.0)])
            .unwrap();

        let orders = db.list_offline_orders(None).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderSyncStatus::Pending);

        let op = db
            .operation_for_order(enqueued.local_order_id)
            .unwrap()
            .unwrap();
        assert_eq!(op.id, enqueued.operation_id);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.local_order_id, Some(enqueued.local_order_id));
    }

    #[test]
    fn test_cash_order_updates_exposure_and_change() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 10.85}), &[cash(10.85, 20.0)])
            .unwrap();

        assert!((enqueued.change_due.unwrap() - 9.15).abs() < 1e-9);

        let exposure = db.exposure().unwrap();
        assert_eq!(exposure.transaction_count, 1);
        assert!((exposure.cash_total - 10.85).abs() < 1e-9);
        assert!((exposure.card_total - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_payment_joins_pending_order() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 30.0}), &[cash(10.0, 10.0)])
            .unwrap();

        db.record_payment(
            enqueued.local_order_id,
            &NewOfflinePayment {
                method: PaymentMethod::CardTerminal,
                amount: 20.0,
                tip: 2.0,
                surcharge: 0.5,
                provider_transaction_id: Some("tx_99".to_string()),
                cash_tendered: None,
            },
        )
        .unwrap();

        let payments = db.list_order_payments(enqueued.local_order_id).unwrap();
        assert_eq!(payments.len(), 2);

        let exposure = db.exposure().unwrap();
        assert_eq!(exposure.transaction_count, 2);
        assert!((exposure.card_total - 22.5).abs() < 1e-9);

        // The operation envelope carries both payments
        let op = db
            .operation_for_order(enqueued.local_order_id)
            .unwrap()
            .unwrap();
        assert_eq!(op.payload["payments"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_split_payment_after_send_is_rejected() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 10.0}), &[])
            .unwrap();
        db.mark_operation_sending(enqueued.operation_id).unwrap();

        let err = db
            .record_payment(enqueued.local_order_id, &cash(10.0, 10.0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));

        // Nothing was written
        assert!(db
            .list_order_payments(enqueued.local_order_id)
            .unwrap()
            .is_empty());
        assert_eq!(db.exposure().unwrap().transaction_count, 0);
    }

    #[test]
    fn test_approval_enqueue_is_atomic() {
        let db = Database::in_memory().unwrap();
        let hash = crate::db::staff::hash_pin("9999").unwrap();
        let (approval_id, operation_id) = db
            .record_approval(ApprovalKind::Void, &hash, None, Some("order 12"), None)
            .unwrap();
        assert!(approval_id > 0);

        let ops = db.list_operations(Some(OperationStatus::Pending), None).unwrap();
        assert!(ops.iter().any(|op| op.id == operation_id));

        let approvals = db.list_approvals(Some(false)).unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].kind, ApprovalKind::Void);
    }

    #[test]
    fn test_queue_operation_rejects_orders() {
        let db = Database::in_memory().unwrap();
        let err = db
            .queue_operation(OperationKind::Order, serde_json::json!({}), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));

        // Inventory adjustments are fine
        db.queue_operation(
            OperationKind::Inventory,
            serde_json::json!({"product_id": 1, "delta": -2}),
            None,
        )
        .unwrap();
    }

    #[test]
    fn test_conflict_marks_order_and_keeps_reason() {
        let db = Database::in_memory().unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 5.0}), &[])
            .unwrap();

        db.mark_order_conflict(enqueued.local_order_id, "duplicate_local_id")
            .unwrap();
        let order = db.get_offline_order(enqueued.local_order_id).unwrap().unwrap();
        assert_eq!(order.status, OrderSyncStatus::Conflict);
        assert_eq!(order.conflict_reason.as_deref(), Some("duplicate_local_id"));
    }
}

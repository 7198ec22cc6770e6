//! Queue-drain worker
//!
//! Processes PENDING operations oldest-first, one at a time, honoring the
//! per-order ordering rule. Retryable failures back off exponentially with
//! jitter; after the attempt budget the operation is parked until the next
//! scheduled tick and the pass moves on to unrelated work.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use super::client::{BackendClient, SubmitOutcome};
use super::signing::sign_operation;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventBus};
use crate::models::OperationKind;

/// Most consecutive attempts for one operation within a single pass.
const MAX_CONSECUTIVE_ATTEMPTS: i64 = 5;

/// Backoff cap in seconds.
const BACKOFF_CAP_SECS: u64 = 30;

/// What one drain pass achieved
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub sent: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub parked: usize,
}

impl DrainReport {
    pub fn drained(&self) -> usize {
        self.sent
    }
}

/// Deterministic part of the backoff schedule: 1s doubling to the cap.
fn backoff_base_secs(attempt: i64) -> u64 {
    let exponent = attempt.clamp(1, 6) as u32 - 1;
    (1u64 << exponent).min(BACKOFF_CAP_SECS)
}

/// Full backoff delay with up to 50% added jitter.
fn backoff_delay(attempt: i64) -> Duration {
    let base = backoff_base_secs(attempt);
    let jitter_ms = rand::thread_rng().gen_range(0..=base * 500);
    Duration::from_millis(base * 1000 + jitter_ms)
}

/// Drain the queue until nothing is drainable or auth fails.
///
/// Requires pairing (the signature needs the device secret). Cancellation
/// happens by dropping the future; an operation left in SENDING is
/// recovered at the next startup.
pub async fn drain_queue(
    db: &Database,
    client: &BackendClient,
    events: &EventBus,
    park_for: Duration,
) -> Result<DrainReport> {
    let pairing = db.require_pairing()?;
    let mut report = DrainReport::default();

    // Operations parked during this pass, and the orders they belong to,
    // are skipped so the pass terminates.
    let mut skip_ops: Vec<Uuid> = Vec::new();
    let mut skip_orders: Vec<Uuid> = Vec::new();

    while let Some(op) = db.next_drainable_operation(&skip_ops, &skip_orders)? {
        let payload_text = serde_json::to_string(&op.payload)?;
        let signature = sign_operation(&pairing.signing_secret, op.id, &payload_text);
        db.set_operation_signature(op.id, &signature)?;
        db.mark_operation_sending(op.id)?;

        let mut attempt = 0i64;
        loop {
            attempt += 1;
            match client
                .submit_operation(&op, &signature, &pairing.terminal_id)
                .await
            {
                SubmitOutcome::Accepted {
                    server_order_id,
                    server_order_number,
                    body,
                } => {
                    db.mark_operation_sent(op.id, Some(&body))?;
                    match op.kind {
                        OperationKind::Order => {
                            if let Some(local_id) = op.local_order_id {
                                db.mark_order_synced(
                                    local_id,
                                    server_order_id.as_deref(),
                                    server_order_number.as_deref(),
                                )?;
                            }
                        }
                        OperationKind::Approval => {
                            if let Some(approval_id) =
                                op.payload.get("approval_id").and_then(|v| v.as_i64())
                            {
                                db.mark_approval_synced(approval_id)?;
                            }
                        }
                        OperationKind::Inventory => {}
                    }
                    report.sent += 1;
                    break;
                }
                SubmitOutcome::Conflict { reason, body } => {
                    warn!(operation = %op.id, reason = %reason, "Operation rejected with conflict");
                    db.mark_operation_failed(op.id, &reason, Some(&body))?;
                    if let Some(local_id) = op.local_order_id {
                        db.mark_order_conflict(local_id, &reason)?;
                        events.emit(CoreEvent::OrderConflict {
                            local_order_id: local_id,
                            reason: reason.clone(),
                        });
                    }
                    report.conflicts += 1;
                    break;
                }
                SubmitOutcome::Permanent { status, body } => {
                    let error = format!("backend returned {}", status);
                    warn!(operation = %op.id, status, "Operation permanently failed");
                    db.mark_operation_failed(op.id, &error, Some(&body))?;
                    events.emit(CoreEvent::OperationFailed {
                        operation_id: op.id,
                        error,
                    });
                    report.failed += 1;
                    break;
                }
                SubmitOutcome::AuthRejected => {
                    // Put the operation back; it drains once a valid key
                    // is stored again.
                    db.mark_operation_retry(op.id, "API key rejected")?;
                    events.emit(CoreEvent::QueueChanged);
                    return Err(Error::AuthInvalid);
                }
                SubmitOutcome::Retryable { detail } => {
                    if attempt >= MAX_CONSECUTIVE_ATTEMPTS {
                        db.park_operation(op.id, &detail, Utc::now() + chrono::Duration::from_std(park_for).unwrap_or_else(|_| chrono::Duration::minutes(5)))?;
                        match op.local_order_id {
                            Some(order) => skip_orders.push(order),
                            None => skip_ops.push(op.id),
                        }
                        report.parked += 1;
                        break;
                    }
                    db.mark_operation_retry(op.id, &detail)?;
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    db.mark_operation_sending(op.id)?;
                }
            }
        }
    }

    if report.sent + report.failed + report.conflicts + report.parked > 0 {
        info!(
            sent = report.sent,
            failed = report.failed,
            conflicts = report.conflicts,
            parked = report.parked,
            "Queue drain pass finished"
        );
        events.emit(CoreEvent::QueueChanged);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        assert_eq!(backoff_base_secs(1), 1);
        assert_eq!(backoff_base_secs(2), 2);
        assert_eq!(backoff_base_secs(3), 4);
        assert_eq!(backoff_base_secs(4), 8);
        assert_eq!(backoff_base_secs(5), 16);
        assert_eq!(backoff_base_secs(6), 30);
        assert_eq!(backoff_base_secs(40), 30);
    }

    #[test]
    fn test_backoff_jitter_stays_bounded() {
        for attempt in 1..=6 {
            let base = backoff_base_secs(attempt);
            let delay = backoff_delay(attempt);
            assert!(delay >= Duration::from_secs(base));
            assert!(delay <= Duration::from_millis(base * 1500));
        }
    }
}

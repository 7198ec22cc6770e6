//! Operation queue and offline-order handlers
//!
//! Mutations require pairing. Every enqueue runs the exposure guard first,
//! so a blocked payment writes nothing, and requests a drain pass when the
//! terminal is online.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use till_core::models::{
    ApprovalKind, NetworkStatus, NewOfflinePayment, OfflineApproval, OfflineOrder, OfflinePayment,
    Operation, OperationKind, OperationStatus, OrderSyncStatus,
};
use till_core::EnqueuedOrder;

use crate::{AppError, AppState};

fn drain_if_online(state: &AppState) {
    if matches!(state.db.network_status(), Ok(NetworkStatus::Online)) {
        state.sync.request_drain();
    }
}

// ---------------------------------------------------------------------------
// Orders and payments
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RecordOrderRequest {
    /// Full order snapshot (items, totals). Payments ride separately below
    /// and are embedded into the envelope by the core.
    pub payload: serde_json::Value,
    #[serde(default)]
    pub payments: Vec<NewOfflinePayment>,
}

/// record-order: capture an offline order with its payments, atomically.
pub async fn record_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecordOrderRequest>,
) -> Result<Json<EnqueuedOrder>, AppError> {
    state.db.require_pairing()?;
    state.guard.enforce_all(&req.payments)?;

    let enqueued = state.db.record_order(req.payload, &req.payments)?;
    state.events.emit(till_core::CoreEvent::QueueChanged);
    drain_if_online(&state);
    Ok(Json(enqueued))
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<String>,
}

pub async fn list_offline_orders(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<OfflineOrder>>, AppError> {
    let status = filter
        .status
        .as_deref()
        .map(|s| s.parse::<OrderSyncStatus>())
        .transpose()
        .map_err(|e| AppError::bad_request(&e))?;
    Ok(Json(state.db.list_offline_orders(status)?))
}

pub async fn get_offline_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OfflineOrder>, AppError> {
    state
        .db
        .get_offline_order(id)?
        .map(Json)
        .ok_or_else(|| AppError::not_found(&format!("offline order {}", id)))
}

pub async fn list_order_payments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OfflinePayment>>, AppError> {
    Ok(Json(state.db.list_order_payments(id)?))
}

/// record-payment: attach a payment to a still-pending offline order.
pub async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payment): Json<NewOfflinePayment>,
) -> Result<Json<OfflinePayment>, AppError> {
    state.db.require_pairing()?;
    state.guard.enforce(payment.method, payment.exposure())?;

    let recorded = state.db.record_payment(id, &payment)?;
    state.events.emit(till_core::CoreEvent::QueueChanged);
    drain_if_online(&state);
    Ok(Json(recorded))
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RecordApprovalRequest {
    pub kind: ApprovalKind,
    pub manager_username: String,
    pub manager_pin: String,
    pub order_id: Option<Uuid>,
    pub reference: Option<String>,
    pub value: Option<f64>,
}

/// record-approval: verify the manager PIN against the cached staff table,
/// then enqueue the override.
pub async fn record_approval(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecordApprovalRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.require_pairing()?;

    let manager = state
        .db
        .verify_user_pin(&req.manager_username, &req.manager_pin)?
        .ok_or_else(|| AppError::bad_request("manager PIN rejected"))?;

    let pin_hash = till_core::hash_pin(&req.manager_pin)?;
    let (approval_id, operation_id) = state.db.record_approval(
        req.kind,
        &pin_hash,
        req.order_id,
        req.reference.as_deref(),
        req.value,
    )?;

    state.events.emit(till_core::CoreEvent::QueueChanged);
    drain_if_online(&state);
    Ok(Json(serde_json::json!({
        "approval_id": approval_id,
        "operation_id": operation_id,
        "approved_by": manager.username,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalFilter {
    pub synced: Option<bool>,
}

pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ApprovalFilter>,
) -> Result<Json<Vec<OfflineApproval>>, AppError> {
    Ok(Json(state.db.list_approvals(filter.synced)?))
}

// ---------------------------------------------------------------------------
// Generic operations
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QueueOperationRequest {
    pub kind: OperationKind,
    pub payload: serde_json::Value,
    pub order_id: Option<Uuid>,
}

/// queue-operation: enqueue an inventory adjustment.
pub async fn queue_operation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueueOperationRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.require_pairing()?;
    let operation_id = state
        .db
        .queue_operation(req.kind, req.payload, req.order_id)?;
    state.events.emit(till_core::CoreEvent::QueueChanged);
    drain_if_online(&state);
    Ok(Json(serde_json::json!({"operation_id": operation_id})))
}

#[derive(Debug, Default, Deserialize)]
pub struct OperationFilter {
    pub status: Option<String>,
    pub order_id: Option<Uuid>,
}

/// list-pending (and any other status) with filters.
pub async fn list_operations(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<OperationFilter>,
) -> Result<Json<Vec<Operation>>, AppError> {
    let status = filter
        .status
        .as_deref()
        .map(|s| s.parse::<OperationStatus>())
        .transpose()
        .map_err(|e| AppError::bad_request(&e))?;
    Ok(Json(state.db.list_operations(status, filter.order_id)?))
}

pub async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Operation>, AppError> {
    state
        .db
        .get_operation(id)?
        .map(Json)
        .ok_or_else(|| AppError::not_found(&format!("operation {}", id)))
}

#[derive(Debug, Deserialize)]
pub struct ForceStatusRequest {
    pub status: OperationStatus,
}

/// mark synced/failed: reconciliation tooling only, not the normal flow.
pub async fn force_operation_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ForceStatusRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !matches!(req.status, OperationStatus::Sent | OperationStatus::Failed) {
        return Err(AppError::bad_request(
            "only SENT and FAILED may be forced; the drain worker owns the rest",
        ));
    }
    state.db.force_operation_status(id, req.status)?;
    state.events.emit(till_core::CoreEvent::QueueChanged);
    Ok(Json(serde_json::json!({"updated": true})))
}

//! Stats and limit-probe handlers

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use till_core::models::PaymentMethod;
use till_core::{ExposureSnapshot, LimitCheck, QueueStats, SyncStatusReport};

use crate::{AppError, AppState};

#[derive(Debug, Serialize)]
pub struct NetworkStatusView {
    pub status: String,
    pub offline_since: Option<chrono::DateTime<chrono::Utc>>,
    pub offline_seconds: Option<i64>,
}

fn network_view(state: &AppState) -> Result<NetworkStatusView, AppError> {
    let status = state.db.network_status()?;
    let offline_since = state.db.offline_since()?;
    Ok(NetworkStatusView {
        status: status.to_string(),
        offline_seconds: offline_since.map(|t| (chrono::Utc::now() - t).num_seconds()),
        offline_since,
    })
}

pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.db.queue_stats()?))
}

pub async fn network_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NetworkStatusView>, AppError> {
    Ok(Json(network_view(&state)?))
}

pub async fn sync_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncStatusReport>, AppError> {
    Ok(Json(state.sync.status(&state.db, &state.config)?))
}

pub async fn exposure(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExposureSnapshot>, AppError> {
    Ok(Json(state.db.exposure()?))
}

/// get-complete-stats: everything the status bar needs in one round trip.
#[derive(Debug, Serialize)]
pub struct CompleteStats {
    pub queue: QueueStats,
    pub network: NetworkStatusView,
    pub sync: SyncStatusReport,
    pub exposure: ExposureSnapshot,
    pub paired: bool,
}

pub async fn complete_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CompleteStats>, AppError> {
    Ok(Json(CompleteStats {
        queue: state.db.queue_stats()?,
        network: network_view(&state)?,
        sync: state.sync.status(&state.db, &state.config)?,
        exposure: state.db.exposure()?,
        paired: state.db.is_paired()?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckLimitRequest {
    pub method: PaymentMethod,
    pub amount: f64,
}

/// check-limit: probe the exposure guard without enqueueing anything.
pub async fn check_limit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckLimitRequest>,
) -> Result<Json<LimitCheck>, AppError> {
    Ok(Json(state.guard.check(req.method, req.amount)?))
}

//! Pairing and sync-control handlers

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use till_core::models::PairingInfo;

use crate::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct StorePairingRequest {
    pub terminal_id: String,
    pub tenant_id: String,
    pub location_id: String,
    pub signing_secret: String,
    /// Server-issued API key for the sync loops, stored alongside.
    pub api_key: Option<String>,
}

/// store-pairing: bind the terminal, then wake the sync engine.
pub async fn store_pairing(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StorePairingRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let pairing = PairingInfo {
        terminal_id: req.terminal_id,
        tenant_id: req.tenant_id,
        location_id: req.location_id,
        signing_secret: req.signing_secret,
        paired_at: chrono::Utc::now(),
    };
    state.db.store_pairing(&pairing)?;

    if let Some(key) = req.api_key.as_deref() {
        state.db.set_api_key(key)?;
        state.sync.resume();
    }
    state.monitor.probe_now();

    Ok(Json(serde_json::json!({"paired": true})))
}

/// Pairing without the signing secret; secrets stay inside the core.
#[derive(Debug, Serialize)]
pub struct PairingView {
    pub terminal_id: String,
    pub tenant_id: String,
    pub location_id: String,
    pub paired_at: chrono::DateTime<chrono::Utc>,
}

pub async fn get_pairing(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Option<PairingView>>, AppError> {
    let view = state.db.get_pairing()?.map(|p| PairingView {
        terminal_id: p.terminal_id,
        tenant_id: p.tenant_id,
        location_id: p.location_id,
        paired_at: p.paired_at,
    });
    Ok(Json(view))
}

pub async fn clear_pairing(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.clear_pairing()?;
    state.db.clear_api_key()?;
    info!("Pairing and API key cleared via gateway");
    Ok(Json(serde_json::json!({"paired": false})))
}

pub async fn is_paired(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::json!({"paired": state.db.is_paired()?})))
}

/// force-sync: request an immediate full tick.
pub async fn force_sync(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.monitor.probe_now();
    state.sync.request_sync();
    Ok(Json(serde_json::json!({"requested": true})))
}

//! Maintenance handlers: backups, vacuum, cache reset

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use till_core::BackupInfo;

use crate::{AppError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CreateBackupRequest {
    /// Optional name override (defaults to a timestamped name).
    pub name: Option<String>,
}

pub async fn create_backup(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateBackupRequest>>,
) -> Result<Json<BackupInfo>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let info = state
        .db
        .create_backup(&state.config.backups_dir(), req.name.as_deref())?;
    Ok(Json(info))
}

pub async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BackupInfo>>, AppError> {
    Ok(Json(till_core::list_backups(&state.config.backups_dir())?))
}

pub async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let path = state.config.backups_dir().join(&name);
    if !path.exists() {
        return Err(AppError::not_found(&format!("backup {}", name)));
    }
    std::fs::remove_file(&path).map_err(|e| AppError::internal(&e.to_string()))?;
    Ok(Json(serde_json::json!({"deleted": name})))
}

/// Restore a backup over the live database file.
///
/// The running process keeps its already-open handle, so the restored file
/// takes effect at the next startup; the response says so explicitly.
pub async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    warn!(backup = %name, "Restoring backup over live database");
    till_core::restore_backup(
        &state.config.backups_dir(),
        &name,
        &state.config.db_path(),
        true,
    )?;
    Ok(Json(serde_json::json!({
        "restored": name,
        "restart_required": true,
    })))
}

pub async fn vacuum(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.vacuum()?;
    Ok(Json(serde_json::json!({"vacuumed": true})))
}

/// clear-cache: drop every reference dataset; outbound state is untouched.
pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.clear_reference_cache()?;
    Ok(Json(serde_json::json!({"cleared": true})))
}

/// Reset the offline exposure counters, when nothing older is outstanding.
pub async fn reset_exposure(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reset = state.db.reset_exposure()?;
    Ok(Json(serde_json::json!({"reset": reset})))
}

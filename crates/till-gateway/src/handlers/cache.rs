//! Reference-cache write handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use till_core::models::DatasetKey;
use till_core::CacheOutcome;

use crate::{AppError, AppState};

/// cache-dataset request body
#[derive(Debug, Deserialize)]
pub struct CacheDatasetRequest {
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub deleted_ids: Vec<i64>,
    /// Mandatory dataset version marker.
    pub version: Option<String>,
}

/// Upsert rows (and apply deletions) for one dataset.
pub async fn cache_dataset(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<CacheDatasetRequest>,
) -> Result<Json<CacheOutcome>, AppError> {
    let key: DatasetKey = key
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;
    let version = req
        .version
        .as_deref()
        .ok_or_else(|| AppError::from(till_core::Error::DatasetVersionRequired(key.to_string())))?;

    let outcome = state
        .db
        .cache_dataset(key, &req.rows, &req.deleted_ids, version)?;
    Ok(Json(outcome))
}

/// delete-records request body
#[derive(Debug, Deserialize)]
pub struct DeleteRecordsRequest {
    pub ids: Vec<i64>,
}

/// Delete reference rows by id.
pub async fn delete_records(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<DeleteRecordsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key: DatasetKey = key
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;
    let deleted = state.db.delete_records(key, &req.ids)?;
    Ok(Json(serde_json::json!({"deleted": deleted})))
}

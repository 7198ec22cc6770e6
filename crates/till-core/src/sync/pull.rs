//! Delta-pull orchestration
//!
//! Datasets are pulled in a fixed dependency order. A failing dataset stops
//! the tick there: its cursor and every later dataset's cursor stay
//! untouched, and the next tick resumes from the stored cursors.

use tracing::{info, warn};

use super::client::BackendClient;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::DATASET_PULL_ORDER;

/// What one delta-pull tick achieved
#[derive(Debug, Clone, Default)]
pub struct PullReport {
    pub datasets_pulled: usize,
    pub rows_upserted: usize,
    pub rows_deleted: usize,
    /// Dataset the tick stopped at, when it did not complete.
    pub failed_at: Option<String>,
}

impl PullReport {
    pub fn complete(&self) -> bool {
        self.failed_at.is_none()
    }
}

/// Pull every reference dataset once, oldest cursor forward.
pub async fn pull_all(db: &Database, client: &BackendClient) -> Result<PullReport> {
    let mut report = PullReport::default();

    for key in DATASET_PULL_ORDER {
        let cursor = db.dataset_version(key)?.map(|v| v.version);

        let page = match client.pull_dataset(key, cursor.as_deref()).await {
            Ok(page) => page,
            Err(Error::AuthInvalid) => return Err(Error::AuthInvalid),
            Err(e) => {
                warn!(dataset = %key, "Delta pull stopped: {}", e);
                report.failed_at = Some(key.as_str().to_string());
                return Ok(report);
            }
        };

        let version = page.effective_version();
        match db.cache_dataset(key, &page.rows, &page.deleted_ids, &version) {
            Ok(outcome) => {
                report.datasets_pulled += 1;
                report.rows_upserted += outcome.upserted;
                report.rows_deleted += outcome.deleted;
            }
            Err(e) => {
                warn!(dataset = %key, "Failed to apply pulled rows: {}", e);
                report.failed_at = Some(key.as_str().to_string());
                return Ok(report);
            }
        }
    }

    info!(
        datasets = report.datasets_pulled,
        upserted = report.rows_upserted,
        deleted = report.rows_deleted,
        "Delta pull complete"
    );
    Ok(report)
}

//! One-shot sync command implementation

use anyhow::{bail, Result};

use till_core::sync::{drain_queue, pull_all, BackendClient};
use till_core::{CoreConfig, Error, EventBus};

use super::open_db;

pub async fn cmd_sync(config: CoreConfig) -> Result<()> {
    let db = open_db(&config)?;

    let Some(api_key) = db.get_api_key()? else {
        bail!("no API key stored; pair the terminal first (till pair --api-key ...)");
    };

    let client = BackendClient::new(&config, Some(api_key))?;

    println!("Verifying API key...");
    match client.verify_identity().await {
        Ok(()) => {}
        Err(Error::AuthInvalid) => {
            db.clear_api_key()?;
            bail!("API key rejected by backend; it has been cleared");
        }
        Err(e) => bail!("backend unreachable: {}", e),
    }

    println!("Pulling reference datasets...");
    db.record_sync_attempt()?;
    let report = pull_all(&db, &client).await?;
    match report.failed_at.as_deref() {
        None => println!(
            "   {} dataset(s), {} row(s) upserted, {} deleted",
            report.datasets_pulled, report.rows_upserted, report.rows_deleted
        ),
        Some(key) => println!(
            "   stopped at {} after {} dataset(s); cursors before it advanced",
            key, report.datasets_pulled
        ),
    }

    println!("Draining operation queue...");
    let events = EventBus::new();
    match drain_queue(&db, &client, &events, config.sync_interval()).await {
        Ok(report) => println!(
            "   {} sent, {} failed, {} conflict(s), {} parked",
            report.sent, report.failed, report.conflicts, report.parked
        ),
        Err(Error::NotPaired(_)) => println!("   skipped: terminal not paired"),
        Err(e) => return Err(e.into()),
    }

    let stats = db.queue_stats()?;
    if stats.pending == 0 && stats.sending == 0 && stats.failed == 0 && db.reset_exposure()? {
        println!("   offline exposure counters reset");
    }

    if report.complete() {
        db.record_sync_success()?;
    }
    println!("✅ Sync complete");
    Ok(())
}

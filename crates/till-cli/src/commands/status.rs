//! Status command implementation

use anyhow::Result;

use till_core::CoreConfig;

use super::open_db;

pub fn cmd_status(config: &CoreConfig, json: bool) -> Result<()> {
    let db = open_db(config)?;

    if json {
        let status = serde_json::json!({
            "pairing": db.get_pairing()?.map(|p| serde_json::json!({
                "terminal_id": p.terminal_id,
                "tenant_id": p.tenant_id,
                "location_id": p.location_id,
                "paired_at": p.paired_at,
            })),
            "network": {
                "status": db.network_status()?.to_string(),
                "offline_since": db.offline_since()?,
            },
            "queue": db.queue_stats()?,
            "exposure": db.exposure()?,
            "sync": {
                "last_attempt": db.last_sync_attempt()?,
                "last_success": db.last_sync_success()?,
            },
            "datasets": db.dataset_versions()?,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Till terminal status");
    println!("====================");

    match db.get_pairing()? {
        Some(pairing) => {
            println!("Pairing:   {} @ {}/{}", pairing.terminal_id, pairing.tenant_id, pairing.location_id);
            println!("Paired at: {}", pairing.paired_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("Pairing:   not paired"),
    }

    let network = db.network_status()?;
    match db.offline_since()? {
        Some(since) => println!("Network:   {} (offline since {})", network, since.format("%H:%M:%S UTC")),
        None => println!("Network:   {}", network),
    }

    let stats = db.queue_stats()?;
    println!(
        "Queue:     {} pending, {} sending, {} sent, {} failed, {} conflicted order(s)",
        stats.pending, stats.sending, stats.sent, stats.failed, stats.conflicted_orders
    );
    if let Some(oldest) = stats.oldest_pending_at {
        println!("           oldest pending from {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    let exposure = db.exposure()?;
    println!(
        "Exposure:  {} transaction(s), cash {:.2}, card {:.2}",
        exposure.transaction_count, exposure.cash_total, exposure.card_total
    );

    match (db.last_sync_attempt()?, db.last_sync_success()?) {
        (Some(attempt), Some(success)) => {
            println!("Sync:      last attempt {}, last success {}",
                attempt.format("%H:%M:%S UTC"), success.format("%H:%M:%S UTC"));
        }
        (Some(attempt), None) => println!("Sync:      last attempt {}, never succeeded", attempt.format("%H:%M:%S UTC")),
        _ => println!("Sync:      never attempted"),
    }

    let versions = db.dataset_versions()?;
    if versions.is_empty() {
        println!("Datasets:  none cached");
    } else {
        println!("Datasets:  {} cached", versions.len());
        let mut keys: Vec<_> = versions.iter().collect();
        keys.sort();
        for (key, version) in keys {
            println!("           {:<20} {}", key, version);
        }
    }

    Ok(())
}

//! Sync engine: delta-pull loop and queue-drain worker
//!
//! One cooperative loop per terminal. Full ticks (pull + drain) fire on the
//! configured interval, on explicit request, and on every offline-to-online
//! transition; drain-only ticks fire when something is enqueued while
//! online. An invalid API key pauses everything until a new key is stored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub mod client;
mod drain;
mod pull;
mod signing;

pub use client::{BackendClient, DatasetPage, SubmitOutcome};
pub use drain::{drain_queue, DrainReport};
pub use pull::{pull_all, PullReport};
pub use signing::sign_operation;

use crate::config::CoreConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventBus};
use crate::models::NetworkStatus;

/// SENDING rows older than this at startup are assumed orphaned.
const SENDING_RECOVERY_MINUTES: i64 = 5;

/// What a requested tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// Delta pull followed by a queue drain.
    Full,
    /// Queue drain only (enqueue-while-online).
    DrainOnly,
}

/// Snapshot of the engine for the stats surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncStatusReport {
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_sync_success: Option<DateTime<Utc>>,
    pub auth_valid: bool,
    pub auto_sync_enabled: bool,
    pub sync_interval_minutes: u64,
    pub in_progress: bool,
    pub dataset_versions: HashMap<String, String>,
}

/// Handle for controlling a spawned sync engine.
#[derive(Clone)]
pub struct SyncHandle {
    tick_tx: mpsc::Sender<TickKind>,
    shutdown_tx: mpsc::Sender<()>,
    paused: Arc<AtomicBool>,
    in_progress: Arc<AtomicBool>,
}

impl SyncHandle {
    /// Ask for a full tick (pull + drain) as soon as the loop is free.
    pub fn request_sync(&self) {
        let _ = self.tick_tx.try_send(TickKind::Full);
    }

    /// Ask for a drain-only pass (something was enqueued while online).
    pub fn request_drain(&self) {
        let _ = self.tick_tx.try_send(TickKind::DrainOnly);
    }

    /// Un-pause after a new API key was stored, and sync right away.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.request_sync();
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Assemble the sync view of `get-sync-status`.
    pub fn status(&self, db: &Database, config: &CoreConfig) -> Result<SyncStatusReport> {
        Ok(SyncStatusReport {
            last_sync_attempt: db.last_sync_attempt()?,
            last_sync_success: db.last_sync_success()?,
            auth_valid: !self.is_paused(),
            auto_sync_enabled: config.auto_sync_enabled,
            sync_interval_minutes: config.sync_interval_minutes,
            in_progress: self.is_in_progress(),
            dataset_versions: db.dataset_versions()?,
        })
    }
}

/// Spawn the sync engine as a background task.
pub fn spawn_engine(db: Database, config: CoreConfig, events: EventBus) -> Result<SyncHandle> {
    let (tick_tx, mut tick_rx) = mpsc::channel(8);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let paused = Arc::new(AtomicBool::new(true));
    let in_progress = Arc::new(AtomicBool::new(false));

    let handle = SyncHandle {
        tick_tx,
        shutdown_tx,
        paused: paused.clone(),
        in_progress: in_progress.clone(),
    };

    let base_client = BackendClient::new(&config, None)?;

    tokio::spawn(async move {
        // Startup recovery: anything a previous process left in SENDING
        // goes back to PENDING before the first drain.
        match db.recover_stuck_sending(SENDING_RECOVERY_MINUTES) {
            Ok(0) => {}
            Ok(n) => warn!("Reset {} orphaned SENDING operation(s) at startup", n),
            Err(e) => error!("Startup queue recovery failed: {}", e),
        }

        verify_auth(&db, &base_client, &paused, &events).await;

        let mut ticker = interval(config.sync_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval fires immediately once; skip that first tick, the
        // startup probe path decides when the first sync runs.
        ticker.tick().await;

        let mut events_rx = events.subscribe();

        loop {
            let kind = tokio::select! {
                _ = ticker.tick() => {
                    if !config.auto_sync_enabled {
                        continue;
                    }
                    TickKind::Full
                }
                Some(kind) = tick_rx.recv() => kind,
                event = events_rx.recv() => match event {
                    Ok(CoreEvent::NetworkChanged { online: true }) => TickKind::Full,
                    Ok(_) => continue,
                    // Lagged subscriber: drop missed events and move on
                    Err(_) => continue,
                },
                _ = shutdown_rx.recv() => {
                    info!("Sync engine stopped");
                    return;
                }
            };

            in_progress.store(true, Ordering::SeqCst);
            let tick = run_tick(&db, &base_client, &config, &events, &paused, kind);
            tokio::select! {
                _ = tick => {}
                _ = shutdown_rx.recv() => {
                    // In-flight HTTP aborts with the dropped future; any
                    // SENDING row recovers at next startup.
                    info!("Sync engine stopped mid-tick");
                    in_progress.store(false, Ordering::SeqCst);
                    return;
                }
            }
            in_progress.store(false, Ordering::SeqCst);
        }
    });

    Ok(handle)
}

/// Verify the stored API key, pausing the loops when it is missing or
/// rejected.
async fn verify_auth(
    db: &Database,
    base_client: &BackendClient,
    paused: &Arc<AtomicBool>,
    events: &EventBus,
) {
    let Ok(key) = db.get_api_key() else {
        paused.store(true, Ordering::SeqCst);
        return;
    };
    let Some(key) = key else {
        info!("No API key stored; sync paused until one is provided");
        paused.store(true, Ordering::SeqCst);
        return;
    };

    match base_client.with_api_key(Some(key)).verify_identity().await {
        Ok(()) => {
            paused.store(false, Ordering::SeqCst);
        }
        Err(Error::AuthInvalid) => {
            warn!("Stored API key rejected; clearing it and pausing sync");
            let _ = db.clear_api_key();
            paused.store(true, Ordering::SeqCst);
            events.emit(CoreEvent::AuthInvalidated);
        }
        Err(e) => {
            // Can't reach the backend: keep the key, try again later.
            debug!("Identity check deferred: {}", e);
            paused.store(false, Ordering::SeqCst);
        }
    }
}

async fn run_tick(
    db: &Database,
    base_client: &BackendClient,
    config: &CoreConfig,
    events: &EventBus,
    paused: &Arc<AtomicBool>,
    kind: TickKind,
) {
    if paused.load(Ordering::SeqCst) {
        // A key may have been stored since the pause; re-verify.
        verify_auth(db, base_client, paused, events).await;
        if paused.load(Ordering::SeqCst) {
            return;
        }
    }

    match db.network_status() {
        Ok(NetworkStatus::Online) => {}
        Ok(_) => {
            debug!("Skipping sync tick while offline");
            return;
        }
        Err(e) => {
            error!("Failed to read network status: {}", e);
            return;
        }
    }

    if let Err(e) = db.record_sync_attempt() {
        warn!("Failed to record sync attempt: {}", e);
    }

    let api_key = db.get_api_key().ok().flatten();
    let client = base_client.with_api_key(api_key);

    let mut pull_ok = true;
    let mut datasets_pulled = 0usize;
    if kind == TickKind::Full {
        match pull::pull_all(db, &client).await {
            Ok(report) => {
                pull_ok = report.complete();
                datasets_pulled = report.datasets_pulled;
            }
            Err(Error::AuthInvalid) => {
                invalidate_auth(db, paused, events);
                return;
            }
            Err(e) => {
                warn!("Delta pull failed: {}", e);
                pull_ok = false;
            }
        }
    }

    let drained = match drain::drain_queue(db, &client, events, config.sync_interval()).await {
        Ok(report) => report.drained(),
        Err(Error::AuthInvalid) => {
            invalidate_auth(db, paused, events);
            return;
        }
        Err(Error::NotPaired(_)) => {
            debug!("Skipping drain: terminal not paired");
            0
        }
        Err(e) => {
            warn!("Queue drain failed: {}", e);
            0
        }
    };

    if pull_ok {
        if let Err(e) = db.record_sync_success() {
            warn!("Failed to record sync success: {}", e);
        }
        // With the queue fully flushed, the offline exposure burst is over.
        match db.queue_stats() {
            Ok(stats) if stats.pending == 0 && stats.sending == 0 && stats.failed == 0 => {
                if let Err(e) = db.reset_exposure() {
                    warn!("Exposure reset failed: {}", e);
                }
            }
            _ => {}
        }
    }

    events.emit(CoreEvent::SyncFinished {
        datasets_pulled,
        drained,
        ok: pull_ok,
    });
}

fn invalidate_auth(db: &Database, paused: &Arc<AtomicBool>, events: &EventBus) {
    warn!("Backend rejected the API key; pausing sync loops");
    let _ = db.clear_api_key();
    paused.store(true, Ordering::SeqCst);
    events.emit(CoreEvent::AuthInvalidated);
}

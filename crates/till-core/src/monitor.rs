//! Network health monitor
//!
//! A long-running probe against the backend health endpoint drives the
//! online/offline state machine. Hysteresis suppresses flapping: one failed
//! probe means nothing, three in a row flip the terminal offline, and a
//! single success flips it back. Host-environment online hints only
//! schedule an immediate probe; they never change state by themselves.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::db::Database;
use crate::events::{CoreEvent, EventBus};
use crate::models::NetworkStatus;

/// What one recorded probe did to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTransition {
    None,
    WentOnline,
    WentOffline,
}

/// Pure hysteresis state, separated from the probe loop so the flip rules
/// are testable without a network.
#[derive(Debug, Clone)]
pub struct ProbeState {
    threshold: u32,
    consecutive_failures: u32,
    status: NetworkStatus,
}

impl ProbeState {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            status: NetworkStatus::Unknown,
        }
    }

    pub fn status(&self) -> NetworkStatus {
        self.status
    }

    /// One successful probe restores online immediately.
    pub fn record_success(&mut self) -> ProbeTransition {
        self.consecutive_failures = 0;
        if self.status != NetworkStatus::Online {
            self.status = NetworkStatus::Online;
            ProbeTransition::WentOnline
        } else {
            ProbeTransition::None
        }
    }

    /// A failure only flips state once the streak reaches the threshold.
    pub fn record_failure(&mut self) -> ProbeTransition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.status != NetworkStatus::Offline && self.consecutive_failures >= self.threshold {
            self.status = NetworkStatus::Offline;
            ProbeTransition::WentOffline
        } else {
            ProbeTransition::None
        }
    }
}

/// Handle for controlling a spawned monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    shutdown_tx: mpsc::Sender<()>,
    probe_now_tx: mpsc::Sender<()>,
}

impl MonitorHandle {
    /// Stop the monitor, aborting any in-flight probe.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Ask for an immediate probe (e.g. the host reported connectivity).
    /// The hint is advisory: state only changes on probe results.
    pub fn probe_now(&self) {
        let _ = self.probe_now_tx.try_send(());
    }
}

/// Spawn the probe loop as a background task.
pub fn spawn_monitor(db: Database, config: &CoreConfig, events: EventBus) -> MonitorHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let (probe_now_tx, mut probe_now_rx) = mpsc::channel(4);

    let url = format!("{}/health", config.backend_url.trim_end_matches('/'));
    let probe_timeout = config.probe_timeout();
    let probe_interval = config.probe_interval();
    let threshold = config.consecutive_failures_to_offline;

    info!(
        url = %url,
        interval_ms = probe_interval.as_millis() as u64,
        threshold,
        "Starting network monitor"
    );

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = interval(probe_interval);
        let mut state = ProbeState::new(threshold);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(()) = probe_now_rx.recv() => {
                    debug!("Probing on external connectivity hint");
                }
                _ = shutdown_rx.recv() => {
                    info!("Network monitor stopped");
                    return;
                }
            }

            let healthy = tokio::select! {
                healthy = probe(&client, &url, probe_timeout) => healthy,
                _ = shutdown_rx.recv() => {
                    info!("Network monitor stopped mid-probe");
                    return;
                }
            };

            let transition = if healthy {
                state.record_success()
            } else {
                state.record_failure()
            };

            match transition {
                ProbeTransition::WentOnline => {
                    info!("Backend reachable, terminal online");
                    if let Err(e) = db.set_network_status(NetworkStatus::Online) {
                        warn!("Failed to persist network status: {}", e);
                    }
                    events.emit(CoreEvent::NetworkChanged { online: true });
                }
                ProbeTransition::WentOffline => {
                    warn!("Backend unreachable, terminal offline");
                    if let Err(e) = db.set_network_status(NetworkStatus::Offline) {
                        warn!("Failed to persist network status: {}", e);
                    }
                    events.emit(CoreEvent::NetworkChanged { online: false });
                }
                ProbeTransition::None => {}
            }
        }
    });

    MonitorHandle {
        shutdown_tx,
        probe_now_tx,
    }
}

async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    match client.get(url).timeout(timeout).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!("Health probe failed: {}", e);
            false
        }
    }
}

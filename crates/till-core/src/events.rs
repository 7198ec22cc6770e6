//! Broadcast events shared between the core, the gateway, and the UI
//!
//! Subscribers register at construction time and receive every event emitted
//! after they subscribe. Lagging subscribers drop old events rather than
//! blocking emitters.

use tokio::sync::broadcast;
use uuid::Uuid;

/// Events the core broadcasts to interested subscribers.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CoreEvent {
    /// The network monitor flipped the online/offline state.
    NetworkChanged { online: bool },
    /// The operation queue changed (enqueue, status transition, purge).
    QueueChanged,
    /// A sync tick finished.
    SyncFinished { datasets_pulled: usize, drained: usize, ok: bool },
    /// An operation permanently failed and needs user attention.
    OperationFailed { operation_id: Uuid, error: String },
    /// An offline order was rejected by the backend.
    OrderConflict { local_order_id: Uuid, reason: String },
    /// The backend rejected the stored API key; sync is paused.
    AuthInvalidated,
}

/// Cheap-to-clone handle around a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        // 64 in-flight events is plenty; slow subscribers lag, not block.
        let (tx, _rx) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Errors (no subscribers) are ignored.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(CoreEvent::NetworkChanged { online: false });

        match rx.recv().await.unwrap() {
            CoreEvent::NetworkChanged { online } => assert!(!online),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.emit(CoreEvent::QueueChanged);
    }
}

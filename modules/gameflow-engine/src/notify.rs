//! Outbound notification bus (tokio broadcast channel).
//!
//! Every lifecycle transition emits a `Notification`. Collaborators
//! (rendering, audio, UI, multiplayer) subscribe; a lagging or absent
//! subscriber never blocks the engine.

use gameflow_common::Notification;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn emit(&self, notification: Notification) {
        debug!(kind = notification.kind(), "notification");
        // No receivers is fine.
        let _ = self.tx.send(notification);
    }
}

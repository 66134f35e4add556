use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::event::{DispatchEvent, NotificationKind};

/// Outbound notification transport.
///
/// Fire-and-forget: implementations must not block and cannot fail the
/// state transition that triggered them.
pub trait Notifier: Send + Sync {
    fn notify(&self, courier_ids: &[Uuid], order_id: Uuid, kind: NotificationKind);
}

/// Publishes every notification as a [`DispatchEvent`] on a broadcast channel.
pub struct BroadcastNotifier {
    events_tx: broadcast::Sender<DispatchEvent>,
    clock: Arc<dyn Clock>,
}

impl BroadcastNotifier {
    pub fn new(events_tx: broadcast::Sender<DispatchEvent>, clock: Arc<dyn Clock>) -> Self {
        Self { events_tx, clock }
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, courier_ids: &[Uuid], order_id: Uuid, kind: NotificationKind) {
        let event = DispatchEvent {
            order_id,
            kind,
            recipients: courier_ids.to_vec(),
            at: self.clock.now(),
        };

        // No subscribers is not a delivery failure worth surfacing.
        if self.events_tx.send(event).is_err() {
            debug!(order_id = %order_id, kind = kind.as_str(), "no event subscribers");
        }
    }
}

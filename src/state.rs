use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::engine::dispatch::DispatchEngine;
use crate::engine::window::BroadcastWindow;
use crate::models::event::DispatchEvent;
use crate::notify::BroadcastNotifier;
use crate::observability::metrics::Metrics;
use crate::store::{DispatchStore, MemoryStore};

pub struct AppState {
    pub engine: DispatchEngine,
    pub events_tx: broadcast::Sender<DispatchEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(broadcast_timeout: Duration, event_buffer_size: usize) -> Self {
        Self::with_parts(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            broadcast_timeout,
            event_buffer_size,
        )
    }

    pub fn with_parts(
        store: Arc<dyn DispatchStore>,
        clock: Arc<dyn Clock>,
        broadcast_timeout: Duration,
        event_buffer_size: usize,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        let metrics = Metrics::new();
        let notifier = Arc::new(BroadcastNotifier::new(events_tx.clone(), clock.clone()));

        let engine = DispatchEngine::new(
            store,
            clock,
            notifier,
            BroadcastWindow::new(broadcast_timeout),
            metrics.clone(),
        );

        Self {
            engine,
            events_tx,
            metrics,
        }
    }
}

//! Event broadcasting
//!
//! Fans [`WorkspaceEvent`]s out to any number of subscribers over a tokio
//! broadcast channel. Emitting never blocks and never fails: with no
//! subscribers the event is dropped, and a subscriber that falls more than
//! `capacity` events behind sees `RecvError::Lagged`.

use super::WorkspaceEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<WorkspaceEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send to all current subscribers, returning how many received it
    pub fn emit(&self, event: WorkspaceEvent) -> usize {
        trace!(event = event.name(), workspace_id = %event.workspace_id(), "Emitting workspace event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn emit_many(&self, events: impl IntoIterator<Item = WorkspaceEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

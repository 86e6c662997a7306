//! Broadcast notifications for observers of the station.
//!
//! Every subscriber gets its own copy of each event.  Publishing with no
//! subscribers is not an error; slow subscribers that fall behind the
//! channel capacity miss the oldest events.

use tokio::sync::broadcast;
use tracing::trace;

use crate::application::station::PortInfo;
use crate::application::throttle_registry::LocomotiveId;

/// Default capacity of the event channel.
pub const EVENT_CAPACITY: usize = 64;

/// Events pushed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationEvent {
    ConnectionChanged(bool),
    ProgrammingTrackChanged(bool),
    PortsChanged(Vec<PortInfo>),
    ThrottleUpdated(LocomotiveId),
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: StationEvent) {
        trace!(?event, "publishing station event");
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

use kestrel_core::{EventEmitter, SchedulingEvent, SchedulingEventKind};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of the broadcast channel
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// Event emitter fanning events out to any number of subscribers.
///
/// Every event is also logged. Emitting with no subscribers is not an
/// error; the event is simply dropped.
pub struct BroadcastEventEmitter {
    tx: broadcast::Sender<SchedulingEvent>,
}

impl BroadcastEventEmitter {
    pub fn new(config: EventBusConfig) -> Self {
        let (tx, _) = broadcast::channel(config.capacity);
        Self { tx }
    }

    /// Subscribe to all events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulingEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventEmitter {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventEmitter for BroadcastEventEmitter {
    fn emit(&self, event: SchedulingEvent) {
        match event.kind {
            SchedulingEventKind::FailedScheduling | SchedulingEventKind::PreemptionInfeasible => {
                warn!("{} {}: {}", event.reason, event.pod, event.message)
            }
            SchedulingEventKind::EvictionArmed | SchedulingEventKind::EvictionCancelled => {
                debug!("{} {}: {}", event.reason, event.pod, event.message)
            }
            _ => info!("{} {}: {}", event.reason, event.pod, event.message),
        }

        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

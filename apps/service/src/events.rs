use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::database::models::Heartbeat;
use crate::monitoring::types::{MonitorStatus, TargetId};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Every persisted heartbeat
    Heartbeat(Heartbeat),
    /// Heartbeats flagged important
    Transition { target_id: TargetId, status: MonitorStatus, message: String, timestamp: DateTime<Utc> },
}

/// Fan-out of engine events to any number of viewers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish_heartbeat(&self, heartbeat: &Heartbeat) {
        self.publish(EngineEvent::Heartbeat(heartbeat.clone()));
        if heartbeat.important {
            trace!(target_id = heartbeat.target_id, status = %heartbeat.status, "Publishing transition");
            self.publish(EngineEvent::Transition {
                target_id: heartbeat.target_id,
                status: heartbeat.status,
                message: heartbeat.message.clone(),
                timestamp: heartbeat.timestamp,
            });
        }
    }

    fn publish(&self, event: EngineEvent) {
        // Ignore errors if there are no receivers
        let _ = self.tx.send(event);
    }
}

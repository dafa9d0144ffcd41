//! Broadcast bus for event frames.
//!
//! Every connected client receives every event; per-run ordering is
//! guaranteed because each run has a single emitting task.

use crate::frames::Frame;
use serde_json::Value;
use tokio::sync::broadcast;

pub struct EventBus {
    tx: broadcast::Sender<String>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Serialize and fan out one event frame. A bus with no connected
    /// clients drops the event silently.
    pub fn broadcast(&self, topic: &str, data: Value) {
        let frame = Frame::event(topic, data);
        match serde_json::to_string(&frame) {
            Ok(text) => {
                let _ = self.tx.send(text);
            }
            Err(e) => log::error!("Failed to serialize event frame: {e}"),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

//! In-process event fan-out.
//!
//! A thin wrapper over a tokio broadcast channel: at-most-once delivery,
//! no persistence, lagging subscribers lose messages. UI transports (or a
//! log tap in the meantime) subscribe; services only publish.

use serde_json::Value;
use tokio::sync::broadcast;

/// Admin dashboards refresh their loan tables on this topic.
pub const TOPIC_LOANS: &str = "loans";
/// Catalog data (books, copies, categories) changed.
pub const TOPIC_CATALOG: &str = "catalog";

/// Per-user topic for personal notification payloads.
pub fn user_topic(user_id: i32) -> String {
    format!("user:{}", user_id)
}

#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Best-effort publish. Having no subscribers is not an error.
    pub fn publish(&self, topic: &str, payload: Value) {
        let event = Event {
            topic: topic.to_string(),
            payload,
        };
        if self.tx.send(event).is_err() {
            tracing::trace!(topic, "event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

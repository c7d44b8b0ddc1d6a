//! Fan-out of inbound messages the core has no vocabulary for.
//!
//! Uses a tokio broadcast channel: each subscriber gets an independent
//! receiver buffering up to `capacity` events. A subscriber that falls
//! behind loses its oldest events; the core never blocks on it.

use serde_json::Value;
use tokio::sync::broadcast;

/// An inbound message re-emitted under its original kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayedEvent {
    /// The frame's `type` field.
    pub kind: String,
    /// The complete original frame, `type` included.
    pub payload: Value,
}

/// Broadcast relay for application-level messages.
#[derive(Clone)]
pub struct EventRelay {
    sender: broadcast::Sender<RelayedEvent>,
}

impl EventRelay {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber. Only events relayed afterwards are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayedEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Returns the number of subscribers it reached.
    pub fn relay(&self, kind: impl Into<String>, payload: Value) -> usize {
        // No subscribers is not an error; the event is simply unobserved.
        self.sender
            .send(RelayedEvent {
                kind: kind.into(),
                payload,
            })
            .unwrap_or(0)
    }
}

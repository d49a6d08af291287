//! Notifications emitted after a chat is fully synced, plus source
//! connectivity transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    NewMessage {
        chat_id: String,
        message_id: String,
        text: String,
        created_at: DateTime<Utc>,
    },
    DealUpdated {
        chat_id: String,
        message_count: i64,
        sync_status: String,
    },
    /// Published when page fetches start failing and again when they recover.
    ConnectionStatus {
        connected: bool,
        detail: Option<String>,
    },
}

/// Delivery is best effort; a sink never reports failure back to the engine.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: SyncEvent);
}

/// Writes events to the log only.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: SyncEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::debug!(%payload, "sync event"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize sync event"),
        }
    }
}

/// Fans events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<SyncEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

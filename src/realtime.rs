//! In-process realtime bus.
//!
//! Channels are named `messages:<user>:<conversation>` and
//! `conversations:<user>`, mirroring table-level change events. One broadcast
//! sender fans out to every socket; sockets filter by channel name. No replay
//! and no reconnection logic beyond the transport's.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

#[derive(Clone)]
pub struct RealtimeBus {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl Default for RealtimeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, channel: String, event: &str, payload: Value) {
        // Zero receivers is normal; nobody is watching.
        let _ = self.tx.send(RealtimeEvent {
            channel,
            event: event.to_string(),
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

pub fn messages_channel(user_id: &str, conversation_id: &str) -> String {
    format!("messages:{user_id}:{conversation_id}")
}

pub fn conversations_channel(user_id: &str) -> String {
    format!("conversations:{user_id}")
}

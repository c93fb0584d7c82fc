//! Outbound event contract and sink implementations
//!
//! The orchestrator pushes results through an [`EventSink`] rather than
//! directly into a transport; the WebSocket broadcast is one concrete
//! implementation, an in-memory recorder another.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::ThreatRecord;

/// Events consumed by result subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event {
    StatusUpdate { message: String },
    NewThreatData { source: String, data: ThreatRecord },
    NewGeoThreat(ThreatRecord),
    TagAdded { threat_id: String, tag: String },
}

impl Event {
    pub fn status(message: impl Into<String>) -> Self {
        Event::StatusUpdate {
            message: message.into(),
        }
    }
}

/// Capability to push events toward subscribers
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink feeding the broadcast channel behind the WebSocket route
pub struct BroadcastSink {
    tx: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: Event) {
        // Nobody listening is fine; events are fire-and-forget
        let _ = self.tx.send(event);
    }
}

/// Sink that records every event in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

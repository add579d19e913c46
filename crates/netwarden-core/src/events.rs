//! Monitor events published on the in-process event bus.
//!
//! The status aggregator and scanner loop publish; side-effect consumers
//! (the physical indicator signal, log shippers) subscribe independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl MonitorEvent {
    pub fn new(timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            payload,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A network status summary was computed.
    StatusObserved {
        secure: bool,
        connected_count: usize,
        unauthorized_count: usize,
    },

    // ── Sweep lifecycle ───────────────────────────────────────
    ScanStarted {
        scan_id: Uuid,
        target: String,
    },
    ScanCompleted {
        scan_id: Uuid,
        observed: u32,
        new_count: u32,
        moved_count: u32,
        reconnected_count: u32,
        disconnected_count: u32,
        duration_ms: u64,
    },
    ScanFailed {
        scan_id: Uuid,
        error: String,
    },
}

//! Event types and the in-process event bus
//!
//! Services publish domain events on a `tokio::sync::broadcast` channel; the SSE
//! endpoint of each service relays them to connected operator consoles.

use crate::models::{ImportKind, ScanMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// GCT event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GctEvent {
    /// A scan row was written to `bottle_scans`
    ScanRecorded {
        organization_id: String,
        bottle_barcode: String,
        order_number: Option<String>,
        mode: ScanMode,
        timestamp: DateTime<Utc>,
    },

    /// A scan was captured while offline and appended to the local queue
    OfflineScanQueued {
        queued: usize,
        timestamp: DateTime<Utc>,
    },

    /// A replay of the offline queue finished
    OfflineSyncCompleted {
        success: bool,
        synced_items: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A staged import was materialized
    ImportApproved {
        kind: ImportKind,
        import_id: i64,
        customer_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A staged import was rejected
    ImportRejected {
        kind: ImportKind,
        import_id: i64,
        timestamp: DateTime<Utc>,
    },
}

impl GctEvent {
    /// SSE event name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            GctEvent::ScanRecorded { .. } => "ScanRecorded",
            GctEvent::OfflineScanQueued { .. } => "OfflineScanQueued",
            GctEvent::OfflineSyncCompleted { .. } => "OfflineSyncCompleted",
            GctEvent::ImportApproved { .. } => "ImportApproved",
            GctEvent::ImportRejected { .. } => "ImportRejected",
        }
    }
}

/// Broadcast bus for [`GctEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GctEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<GctEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: GctEvent) -> Result<usize, broadcast::error::SendError<GctEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: GctEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

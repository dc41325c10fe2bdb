//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the engine facade,
//! the executor and any observers (progress displays, audit sinks).

use bulkops_core::kind::OperationKind;
use bulkops_core::status::OperationStatus;
use bulkops_core::types::{OperationId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// OperationEvent
// ---------------------------------------------------------------------------

/// What happened to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationEventKind {
    Created { target_count: usize },
    Confirmed { confirmed_by: String },
    Queued,
    Started,
    BatchCompleted {
        batch: usize,
        total_batches: usize,
        progress: u8,
        failed_in_batch: usize,
    },
    Paused,
    Resumed,
    Cancelled,
    Finished { status: OperationStatus },
}

/// A lifecycle event for one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEvent {
    pub operation_id: OperationId,
    pub operation_kind: OperationKind,
    pub event: OperationEventKind,
    pub timestamp: Timestamp,
}

impl OperationEvent {
    pub fn new(operation_id: OperationId, operation_kind: OperationKind, event: OperationEventKind) -> Self {
        Self {
            operation_id,
            operation_kind,
            event,
            timestamp: Utc::now(),
        }
    }

    /// Dot-separated event name, e.g. `"operation.batch_completed"`.
    pub fn name(&self) -> &'static str {
        match self.event {
            OperationEventKind::Created { .. } => "operation.created",
            OperationEventKind::Confirmed { .. } => "operation.confirmed",
            OperationEventKind::Queued => "operation.queued",
            OperationEventKind::Started => "operation.started",
            OperationEventKind::BatchCompleted { .. } => "operation.batch_completed",
            OperationEventKind::Paused => "operation.paused",
            OperationEventKind::Resumed => "operation.resumed",
            OperationEventKind::Cancelled => "operation.cancelled",
            OperationEventKind::Finished { .. } => "operation.finished",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`OperationEvent`].
///
/// ```rust
/// use bulkops_core::kind::OperationKind;
/// use bulkops_core::types::new_operation_id;
/// use bulkops_events::{EventBus, OperationEvent, OperationEventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(OperationEvent::new(
///     new_operation_id(),
///     OperationKind::Export,
///     OperationEventKind::Queued,
/// ));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<OperationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed events are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: OperationEvent) {
        tracing::trace!(
            operation_id = %event.operation_id,
            event = event.name(),
            "Publishing operation event"
        );
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

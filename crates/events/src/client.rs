//! Registry entries for connected streaming clients.

use lumen_core::types::Timestamp;
use serde_json::Value;
use tokio::sync::mpsc;

/// Default capacity of a client's outbound event queue.
pub const DEFAULT_CLIENT_CAPACITY: usize = 10;

/// One event queued for a client. The name has already passed
/// [`validate_event_name`](crate::broker::validate_event_name).
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub event: String,
    pub data: Value,
}

/// Identifies one registration of a client id.
///
/// `key` is unique per registration, so an old connection that shares an id
/// with its replacement can only ever unregister itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTicket {
    pub id: String,
    pub(crate) key: u64,
}

/// Broker-side half of a connected client.
pub(crate) struct SseClient {
    pub(crate) ticket: ClientTicket,
    pub(crate) sender: mpsc::Sender<OutboundEvent>,
    pub(crate) connected_at: Timestamp,
}

/// Outcome of pushing one event onto a client queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    /// Queue full. The event is dropped for this client only.
    Dropped,
    /// The connection side is gone; unregistration is pending.
    Disconnected,
}

impl SseClient {
    pub(crate) fn new(ticket: ClientTicket, capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let client = Self {
            ticket,
            sender,
            connected_at: chrono::Utc::now(),
        };
        (client, receiver)
    }

    /// Non-blocking enqueue. Never waits on a slow consumer.
    pub(crate) fn offer(&self, event: OutboundEvent) -> Delivery {
        match self.sender.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }
}

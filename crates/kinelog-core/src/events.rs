//! Connection and data event system.
//!
//! Everything the core reports outward travels on one broadcast channel:
//! connection lifecycle, service discovery results, and raw notification
//! payloads. UI and export collaborators subscribe; the core never blocks
//! on them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the connection manager and notification router.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event
/// types in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Event {
    /// A connection attempt was initiated.
    Connecting {
        /// Device address.
        address: String,
    },
    /// The link came up.
    Connected {
        /// Device address.
        address: String,
    },
    /// The link went down, or the device was forgotten.
    Disconnected {
        /// Device address.
        address: String,
        /// Why the link went down.
        reason: DisconnectReason,
    },
    /// Service discovery completed.
    ServicesDiscovered {
        /// Device address.
        address: String,
        /// Every characteristic found on the device.
        characteristics: Vec<Uuid>,
    },
    /// A notification payload arrived.
    DataAvailable {
        /// Originating device address.
        address: String,
        /// Payload formatted as space-separated uppercase hex octets.
        hex: String,
        /// Raw payload bytes.
        bytes: Vec<u8>,
    },
    /// A non-fatal error occurred during device operation.
    Error {
        /// Device address the error relates to.
        address: String,
        /// Error description.
        error: String,
    },
}

/// Reason for a [`Event::Disconnected`].
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Teardown requested by the caller.
    UserRequested,
    /// The device was forgotten.
    Forgotten,
    /// The link failed at the protocol level (timeout, remote reject,
    /// out of range). Retryable by the caller.
    LinkFailure(String),
    /// Unknown reason.
    Unknown,
}

/// Sender for core events.
pub type EventSender = broadcast::Sender<Event>;

/// Receiver for core events.
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event dispatcher fanning events out to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new dispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: Event) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

//! Trait abstractions over the native BLE stack.
//!
//! The connection manager never touches btleplug directly; it drives a
//! [`SensorLink`] per device and obtains links through a
//! [`LinkResolver`]. The `ble` module implements both against the real
//! stack, and `mock` provides in-process doubles so the state machine is
//! testable without hardware.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::Stream;
use uuid::Uuid;

use crate::error::Result;

/// One inbound notification: originating characteristic and payload.
pub type Notification = (Uuid, Vec<u8>);

/// Stream of inbound notifications from one device.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// Handle to one peripheral's GATT link.
///
/// Exclusively owned by the connection manager's record for the device.
/// Callbacks must never be correlated by handle identity (the stack may
/// reuse handles), so every method is keyed off [`address`](Self::address)
/// upstream.
#[async_trait]
pub trait SensorLink: Send + Sync {
    /// Stable device address this link belongs to.
    fn address(&self) -> &str;

    /// Open or resume the GATT link.
    async fn connect(&self) -> Result<()>;

    /// Request link teardown. Completion is reported by the stack, not
    /// by this call.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the stack currently reports the link as up.
    async fn is_connected(&self) -> bool;

    /// Run service discovery and return every characteristic found.
    async fn discover_services(&self) -> Result<Vec<Uuid>>;

    /// Enable or disable notifications on a characteristic.
    async fn set_notify(&self, characteristic: Uuid, enabled: bool) -> Result<()>;

    /// Write a payload to a characteristic.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Obtain the notification stream for this device.
    ///
    /// The stream ends when the link goes down.
    async fn notifications(&self) -> Result<NotificationStream>;
}

/// Resolves device addresses to link handles.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Fail fast if the adapter is unusable.
    ///
    /// Called at the top of `connect` so adapter problems surface
    /// synchronously, before any record is touched.
    async fn adapter_ready(&self) -> Result<()>;

    /// Resolve an address to a fresh link handle.
    ///
    /// Unknown or malformed addresses are synchronous
    /// [`Error::DeviceNotFound`](crate::Error::DeviceNotFound) errors.
    async fn resolve(&self, address: &str) -> Result<Arc<dyn SensorLink>>;
}

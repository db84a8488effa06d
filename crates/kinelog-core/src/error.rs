//! Error types for kinelog-core.
//!
//! Synchronous failures (adapter missing, unknown address, empty connect
//! set) are returned from the initiating call. Link-level failures after
//! initiation are never returned; they arrive as
//! [`Event::Disconnected`](crate::Event::Disconnected) on the event
//! channel. No error in this crate terminates the process.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use kinelog_types::SinkError;

/// Errors that can occur while managing sensor connections.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the native stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The address does not resolve to a reachable peripheral.
    #[error("device not found: {address}")]
    DeviceNotFound {
        /// The address that failed to resolve.
        address: String,
    },

    /// Operation attempted on a device that is not connected.
    #[error("not connected: {address}")]
    NotConnected {
        /// The address the operation targeted.
        address: String,
    },

    /// `connect`/`disconnect` called with an empty address set.
    #[error("no device addresses given")]
    NoAddresses,

    /// Required characteristic not present in the discovered set.
    #[error("characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: Uuid,
    },

    /// A stack operation timed out.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// A buffered batch could not be persisted.
    #[error(transparent)]
    Storage(#[from] SinkError),
}

impl Error {
    /// Create a device-not-found error for an address.
    pub fn device_not_found(address: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            address: address.into(),
        }
    }

    /// Create a not-connected error for an address.
    pub fn not_connected(address: impl Into<String>) -> Self {
        Self::NotConnected {
            address: address.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

/// Result type alias using kinelog-core's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::device_not_found("AA:BB:CC:DD:EE:FF");
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));

        let err = Error::NoAddresses;
        assert_eq!(err.to_string(), "no device addresses given");

        let err = Error::timeout("connect", Duration::from_secs(15));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("15s"));
    }

    #[test]
    fn sink_error_converts() {
        let err: Error = SinkError::at_row(99, "locked").into();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("99"));
    }
}

//! Bluetooth UUIDs for the kinematic sensor unit.
//!
//! The sensor exposes a Nordic-style UART service (as shipped on the
//! Adafruit Bluefruit line): the peripheral notifies sample frames on RX
//! and accepts commands on TX.

use uuid::{Uuid, uuid};

// --- UART service ---

/// UART service UUID.
pub const UART_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// TX characteristic; the host writes commands to the sensor here.
pub const UART_TX: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// RX characteristic; the sensor notifies sample frames here.
pub const UART_RX: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

/// Maximum payload per TX write, in bytes.
pub const TX_MAX_BYTES: usize = 20;

// --- Other services on the unit ---

/// Device Firmware Update service (not used during recording).
pub const DFU_SERVICE: Uuid = uuid!("00001530-1212-efde-1523-785feabcd123");

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Characteristics the router is allowed to subscribe to.
///
/// Static capability table: only characteristics listed here are toggled
/// by `enable_all`, regardless of what the peripheral advertises as
/// notifiable.
pub const NOTIFIABLE: &[Uuid] = &[UART_RX];

/// Whether a characteristic is in the notifiable capability table.
pub fn is_notifiable(uuid: &Uuid) -> bool {
    NOTIFIABLE.contains(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rx_is_notifiable_tx_is_not() {
        assert!(is_notifiable(&UART_RX));
        assert!(!is_notifiable(&UART_TX));
        assert!(!is_notifiable(&DFU_SERVICE));
    }
}

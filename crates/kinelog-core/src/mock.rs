//! In-process doubles for the link traits.
//!
//! [`MockResolver`] and [`MockLink`] stand in for the native BLE stack
//! so the connection manager and data path can be exercised without
//! hardware. Payloads are injected with [`MockLink::inject`] and appear
//! on the link's notification stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use kinelog_types::uuids::{UART_RX, UART_SERVICE, UART_TX};

use crate::error::{Error, Result};
use crate::link::{LinkResolver, Notification, NotificationStream, SensorLink};

/// Scripted peripheral.
///
/// Tracks connect/write/notify calls and forwards injected payloads to
/// whoever holds its notification stream.
pub struct MockLink {
    address: String,
    characteristics: Vec<Uuid>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    fail_connect: AtomicBool,
    hold_discovery: AtomicBool,
    discovery_gate: Notify,
    stream_taken: AtomicBool,
    notify_flags: Mutex<HashMap<Uuid, bool>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl MockLink {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            characteristics: vec![UART_SERVICE, UART_TX, UART_RX],
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            hold_discovery: AtomicBool::new(false),
            discovery_gate: Notify::new(),
            stream_taken: AtomicBool::new(false),
            notify_flags: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            tx: Mutex::new(None),
        }
    }

    /// Make the next `connect` call fail.
    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Park `discover_services` calls until
    /// [`release_discovery`](Self::release_discovery), to script
    /// operations that land mid-discovery.
    pub fn hold_discovery(&self) {
        self.hold_discovery.store(true, Ordering::SeqCst);
    }

    /// Let parked `discover_services` calls proceed.
    pub fn release_discovery(&self) {
        self.hold_discovery.store(false, Ordering::SeqCst);
        self.discovery_gate.notify_waiters();
    }

    /// Number of times `connect` was called.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Whether the notification stream has been handed out.
    pub fn pump_running(&self) -> bool {
        self.stream_taken.load(Ordering::SeqCst)
    }

    /// Notification enable state last requested for a characteristic.
    pub fn notify_enabled(&self, characteristic: Uuid) -> bool {
        self.notify_flags
            .lock()
            .unwrap()
            .get(&characteristic)
            .copied()
            .unwrap_or(false)
    }

    /// Every write issued on this link, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    /// Deliver a payload on the notification stream.
    ///
    /// Silently dropped when no stream is attached, like a real stack
    /// delivering into the void.
    pub fn inject(&self, characteristic: Uuid, bytes: Vec<u8>) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send((characteristic, bytes));
        }
    }

    /// Simulate the stack dropping the link: ends the notification
    /// stream.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.tx.lock().unwrap().take();
    }
}

#[async_trait]
impl SensorLink for MockLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(Error::timeout(
                "connect",
                std::time::Duration::from_secs(0),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.drop_link();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        loop {
            if !self.hold_discovery.load(Ordering::SeqCst) {
                break;
            }
            let released = self.discovery_gate.notified();
            if !self.hold_discovery.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }
        Ok(self.characteristics.clone())
    }

    async fn set_notify(&self, characteristic: Uuid, enabled: bool) -> Result<()> {
        if !self.characteristics.contains(&characteristic) {
            return Err(Error::CharacteristicNotFound {
                uuid: characteristic,
            });
        }
        self.notify_flags
            .lock()
            .unwrap()
            .insert(characteristic, enabled);
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((characteristic, data.to_vec()));
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.tx.lock().unwrap() = Some(tx);
        self.stream_taken.store(true, Ordering::SeqCst);
        Ok(Box::pin(futures::stream::poll_fn(move |cx| {
            rx.poll_recv(cx)
        })))
    }
}

/// Resolver over a fixed set of [`MockLink`]s.
#[derive(Default)]
pub struct MockResolver {
    devices: Mutex<HashMap<String, Arc<MockLink>>>,
    adapter_down: AtomicBool,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and return the handle for scripting it.
    pub fn add_device(&self, address: &str) -> Arc<MockLink> {
        let link = Arc::new(MockLink::new(address));
        self.devices
            .lock()
            .unwrap()
            .insert(address.to_owned(), Arc::clone(&link));
        link
    }

    /// Make `adapter_ready` fail.
    pub fn set_adapter_down(&self, down: bool) {
        self.adapter_down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkResolver for MockResolver {
    async fn adapter_ready(&self) -> Result<()> {
        if self.adapter_down.load(Ordering::SeqCst) {
            return Err(Error::AdapterUnavailable);
        }
        Ok(())
    }

    async fn resolve(&self, address: &str) -> Result<Arc<dyn SensorLink>> {
        self.devices
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .map(|link| link as Arc<dyn SensorLink>)
            .ok_or_else(|| Error::device_not_found(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn injected_payloads_reach_the_stream() {
        let link = MockLink::new("AA:BB");
        let mut stream = link.notifications().await.unwrap();

        link.inject(UART_RX, vec![1, 2, 3]);
        let (characteristic, bytes) = stream.next().await.unwrap();
        assert_eq!(characteristic, UART_RX);
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn drop_link_ends_the_stream() {
        let link = MockLink::new("AA:BB");
        let mut stream = link.notifications().await.unwrap();
        link.drop_link();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn resolver_rejects_unknown_addresses() {
        let resolver = MockResolver::new();
        resolver.add_device("AA:BB");

        assert!(resolver.resolve("AA:BB").await.is_ok());
        assert!(matches!(
            resolver.resolve("CC:DD").await,
            Err(Error::DeviceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn adapter_down_is_reported() {
        let resolver = MockResolver::new();
        resolver.set_adapter_down(true);
        assert!(matches!(
            resolver.adapter_ready().await,
            Err(Error::AdapterUnavailable)
        ));
    }
}

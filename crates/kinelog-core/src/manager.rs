//! Multi-device connection manager.
//!
//! One record per device address, guarded by a single `RwLock` map. The
//! lock is held only for record lookups and state transitions; all BLE
//! traffic happens outside it. Native-stack callbacks are correlated by
//! address, never by handle, so a callback that arrives after its device
//! was forgotten simply finds no record and is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kinelog_types::uuids::{TX_MAX_BYTES, UART_TX};

use crate::buffer::SampleBuffer;
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, Event, EventDispatcher, EventReceiver};
use crate::link::{LinkResolver, SensorLink};
use crate::router::NotificationRouter;

/// Connection lifecycle state of one device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Connection attempt in progress.
    Connecting,
    /// Link up, services discovered or being discovered.
    Connected,
    /// Link down; the record is retained for reconnection.
    Disconnected,
}

/// Tunables for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Budget for a single connect attempt, discovery included.
    pub connect_timeout: Duration,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            event_capacity: 100,
        }
    }
}

struct ConnectionRecord {
    link: Option<Arc<dyn SensorLink>>,
    state: LinkState,
    characteristics: Vec<Uuid>,
    pump: Option<JoinHandle<()>>,
}

impl ConnectionRecord {
    fn connecting(link: Arc<dyn SensorLink>) -> Self {
        Self {
            link: Some(link),
            state: LinkState::Connecting,
            characteristics: Vec::new(),
            pump: None,
        }
    }

    fn abort_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Orchestrates connections to any number of kinematic sensor units.
///
/// Cheap to share: wrap in an [`Arc`] and clone freely. All operations
/// are keyed by device address.
pub struct ConnectionManager {
    resolver: Arc<dyn LinkResolver>,
    records: RwLock<HashMap<String, ConnectionRecord>>,
    router: Arc<NotificationRouter>,
    events: EventDispatcher,
    config: ManagerConfig,
}

impl ConnectionManager {
    pub fn new(
        resolver: Arc<dyn LinkResolver>,
        buffer: Arc<SampleBuffer>,
        config: ManagerConfig,
    ) -> Self {
        let events = EventDispatcher::new(config.event_capacity);
        let router = Arc::new(NotificationRouter::new(events.clone(), buffer));
        Self {
            resolver,
            records: RwLock::new(HashMap::new()),
            router,
            events,
            config,
        }
    }

    /// Subscribe to connection and data events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Initiate connections to the given addresses.
    ///
    /// Fails fast with [`Error::NoAddresses`] on an empty list and with
    /// the adapter error if the local adapter is unusable. Addresses
    /// already connecting or connected are skipped, so calling this with
    /// an overlapping list is safe. Resolution failures abort only the
    /// affected address; the rest proceed.
    pub async fn connect(self: &Arc<Self>, addresses: &[String]) -> Result<()> {
        if addresses.is_empty() {
            return Err(Error::NoAddresses);
        }
        self.resolver.adapter_ready().await?;

        let mut first_error = None;
        for address in addresses {
            if let Err(err) = self.connect_one(address).await {
                warn!(address, %err, "connect attempt failed");
                self.events.send(Event::Error {
                    address: address.clone(),
                    error: err.to_string(),
                });
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn connect_one(self: &Arc<Self>, address: &str) -> Result<()> {
        {
            let records = self.records.read().await;
            if let Some(record) = records.get(address) {
                if record.state != LinkState::Disconnected {
                    debug!(address, state = ?record.state, "connect skipped");
                    return Ok(());
                }
            }
        }

        // Resolve before inserting the record so an unknown address never
        // leaves a half-initialized entry behind.
        let link = self.resolver.resolve(address).await?;
        {
            let mut records = self.records.write().await;
            let record = ConnectionRecord::connecting(Arc::clone(&link));
            if let Some(mut old) = records.insert(address.to_owned(), record) {
                old.abort_pump();
            }
        }
        self.events.send(Event::Connecting {
            address: address.to_owned(),
        });

        let manager = Arc::clone(self);
        let address = address.to_owned();
        let timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, link.connect()).await;
            match outcome {
                Ok(Ok(())) => manager.handle_connected(&address).await,
                Ok(Err(err)) => {
                    manager
                        .handle_disconnected(&address, DisconnectReason::LinkFailure(err.to_string()))
                        .await;
                }
                Err(_) => {
                    let err = Error::timeout("connect", timeout);
                    manager
                        .handle_disconnected(&address, DisconnectReason::LinkFailure(err.to_string()))
                        .await;
                }
            }
        });
        Ok(())
    }

    /// Transition an address to connected and bring up its data path.
    ///
    /// Sole authority for the Connecting → Connected transition. A missing
    /// record means the device was forgotten while the connect was in
    /// flight; the callback is dropped without side effects.
    async fn handle_connected(self: &Arc<Self>, address: &str) {
        let link = {
            let mut records = self.records.write().await;
            let Some(record) = records.get_mut(address) else {
                debug!(address, "stale connect callback dropped");
                return;
            };
            record.state = LinkState::Connected;
            record.link.clone()
        };
        let Some(link) = link else { return };

        info!(address, "connected");
        self.events.send(Event::Connected {
            address: address.to_owned(),
        });

        let characteristics = match link.discover_services().await {
            Ok(chars) => chars,
            Err(err) => {
                warn!(address, %err, "service discovery failed");
                self.handle_disconnected(address, DisconnectReason::LinkFailure(err.to_string()))
                    .await;
                return;
            }
        };

        {
            let mut records = self.records.write().await;
            let Some(record) = records.get_mut(address) else {
                // Forgotten while discovery was in flight; registering
                // now would resurrect routing state forget already
                // purged.
                return;
            };
            record.characteristics = characteristics.clone();
            self.router.register_address(address, &characteristics);
        }
        self.events.send(Event::ServicesDiscovered {
            address: address.to_owned(),
            characteristics,
        });

        self.spawn_pump(address, link).await;
    }

    /// Start the notification pump feeding the router.
    async fn spawn_pump(self: &Arc<Self>, address: &str, link: Arc<dyn SensorLink>) {
        let stream = match link.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(address, %err, "notification stream unavailable");
                self.handle_disconnected(address, DisconnectReason::LinkFailure(err.to_string()))
                    .await;
                return;
            }
        };

        let manager = Arc::clone(self);
        let pump_address = address.to_owned();
        let handle = tokio::spawn(async move {
            let mut stream = stream;
            while let Some((characteristic, bytes)) = stream.next().await {
                manager.router.route(&pump_address, characteristic, &bytes);
            }
            // Stream end means the stack dropped the link.
            manager
                .handle_disconnected(&pump_address, DisconnectReason::Unknown)
                .await;
        });

        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(address) {
            record.abort_pump();
            record.pump = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Transition an address to disconnected.
    ///
    /// Idempotent: repeated callbacks for the same drop, or callbacks for
    /// forgotten devices, do nothing.
    async fn handle_disconnected(&self, address: &str, reason: DisconnectReason) {
        {
            let mut records = self.records.write().await;
            let Some(record) = records.get_mut(address) else {
                return;
            };
            if record.state == LinkState::Disconnected {
                return;
            }
            record.state = LinkState::Disconnected;
            record.link = None;
            record.characteristics.clear();
            record.abort_pump();
        }
        self.router.clear_address(address);
        info!(address, ?reason, "disconnected");
        self.events.send(Event::Disconnected {
            address: address.to_owned(),
            reason,
        });
    }

    /// Request teardown of the given devices' links.
    ///
    /// Fire-and-forget per address: each request is issued and the
    /// terminal state is reported on the event channel. Unknown addresses
    /// fail the call but do not stop the remaining teardowns.
    pub async fn disconnect(&self, addresses: &[String]) -> Result<()> {
        if addresses.is_empty() {
            return Err(Error::NoAddresses);
        }
        let mut first_error = None;
        for address in addresses {
            if let Err(err) = self.disconnect_one(address).await {
                warn!(address, %err, "disconnect failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Request teardown of one device's link.
    pub async fn disconnect_one(&self, address: &str) -> Result<()> {
        let link = {
            let records = self.records.read().await;
            let record = records
                .get(address)
                .ok_or_else(|| Error::device_not_found(address))?;
            record.link.clone()
        };
        if let Some(link) = link {
            if let Err(err) = link.disconnect().await {
                warn!(address, %err, "disconnect request failed");
            }
        }
        self.handle_disconnected(address, DisconnectReason::UserRequested)
            .await;
        Ok(())
    }

    /// Remove a device entirely.
    ///
    /// The record is removed first, so any callback or payload still in
    /// flight for this address loses the lookup race and is dropped.
    pub async fn forget(&self, address: &str) -> Result<()> {
        let mut record = {
            let mut records = self.records.write().await;
            records
                .remove(address)
                .ok_or_else(|| Error::device_not_found(address))?
        };
        record.abort_pump();
        self.router.clear_address(address);
        if let Some(link) = record.link.take() {
            // Best-effort teardown; the record is already gone.
            let address = address.to_owned();
            tokio::spawn(async move {
                if let Err(err) = link.disconnect().await {
                    debug!(address, %err, "teardown after forget failed");
                }
            });
        }
        self.events.send(Event::Disconnected {
            address: address.to_owned(),
            reason: DisconnectReason::Forgotten,
        });
        Ok(())
    }

    /// Enable or disable notifications on one characteristic.
    pub async fn set_notifications(
        &self,
        address: &str,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        let link = self.connected_link(address).await?;
        {
            let records = self.records.read().await;
            let record = records
                .get(address)
                .ok_or_else(|| Error::device_not_found(address))?;
            if !record.characteristics.contains(&characteristic) {
                return Err(Error::CharacteristicNotFound {
                    uuid: characteristic,
                });
            }
        }
        link.set_notify(characteristic, enabled).await?;
        self.router.set_enabled(address, characteristic, enabled);
        Ok(())
    }

    /// Enable notifications on every notifiable characteristic the
    /// device exposes. Returns true iff at least one was enabled.
    pub async fn enable_notifications(&self, address: &str) -> Result<bool> {
        let link = self.connected_link(address).await?;
        let discovered = self.characteristics(address).await;
        self.router.enable_all(address, &link, &discovered).await
    }

    /// Flip the notification state of every tracked characteristic
    /// (pause/resume recording without re-discovering). Returns true iff
    /// at least one was toggled.
    pub async fn toggle_notifications(&self, address: &str) -> Result<bool> {
        let link = self.connected_link(address).await?;
        self.router.toggle_all(address, &link).await
    }

    /// Write a command to the device's UART TX characteristic, split into
    /// transport-sized chunks.
    pub async fn send_command(&self, address: &str, data: &[u8]) -> Result<()> {
        let link = self.connected_link(address).await?;
        for chunk in data.chunks(TX_MAX_BYTES) {
            link.write(UART_TX, chunk).await?;
        }
        Ok(())
    }

    /// Current state of an address, if it has a record.
    pub async fn state(&self, address: &str) -> Option<LinkState> {
        self.records.read().await.get(address).map(|r| r.state)
    }

    /// Characteristics discovered on an address.
    pub async fn characteristics(&self, address: &str) -> Vec<Uuid> {
        self.records
            .read()
            .await
            .get(address)
            .map(|r| r.characteristics.clone())
            .unwrap_or_default()
    }

    /// Every address with a record, in any state.
    pub async fn known_addresses(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    /// Addresses currently in the connected state.
    pub async fn connected_addresses(&self) -> Vec<String> {
        self.records
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.state == LinkState::Connected)
            .map(|(a, _)| a.clone())
            .collect()
    }

    async fn connected_link(&self, address: &str) -> Result<Arc<dyn SensorLink>> {
        let records = self.records.read().await;
        let record = records
            .get(address)
            .ok_or_else(|| Error::device_not_found(address))?;
        if record.state != LinkState::Connected {
            return Err(Error::not_connected(address));
        }
        record
            .link
            .clone()
            .ok_or_else(|| Error::not_connected(address))
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockResolver;
    use kinelog_types::frame::FRAME_LEN;
    use kinelog_types::uuids::UART_RX;
    use kinelog_types::{Sample, SampleSink, SinkError};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        samples: StdMutex<Vec<Sample>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.samples.lock().unwrap().len()
        }
    }

    impl SampleSink for RecordingSink {
        fn insert_batch(&self, samples: &[Sample]) -> std::result::Result<usize, SinkError> {
            self.samples.lock().unwrap().extend_from_slice(samples);
            Ok(samples.len())
        }
    }

    fn manager_with(
        resolver: Arc<MockResolver>,
    ) -> (Arc<ConnectionManager>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let buffer = Arc::new(SampleBuffer::new(sink.clone() as Arc<dyn SampleSink>));
        let manager = Arc::new(ConnectionManager::new(
            resolver,
            buffer,
            ManagerConfig::default(),
        ));
        (manager, sink)
    }

    async fn settle<F>(mut predicate: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..500 {
            if predicate() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    async fn wait_for_state(manager: &Arc<ConnectionManager>, address: &str, state: LinkState) {
        for _ in 0..500 {
            if manager.state(address).await == Some(state) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("address never reached {state:?}");
    }

    #[tokio::test]
    async fn empty_address_list_is_rejected() {
        let (manager, _sink) = manager_with(Arc::new(MockResolver::new()));
        let err = manager.connect(&[]).await.unwrap_err();
        assert!(matches!(err, Error::NoAddresses));
    }

    #[tokio::test]
    async fn unknown_address_leaves_no_record() {
        let resolver = Arc::new(MockResolver::new());
        let (manager, _sink) = manager_with(resolver);
        let err = manager
            .connect(&["AA:BB:CC:DD:EE:FF".to_owned()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
        assert!(manager.state("AA:BB:CC:DD:EE:FF").await.is_none());
    }

    #[tokio::test]
    async fn connect_reaches_connected_with_services() {
        let resolver = Arc::new(MockResolver::new());
        let device = resolver.add_device("AA:BB:CC:DD:EE:01");
        let (manager, _sink) = manager_with(resolver);
        let mut rx = manager.subscribe();

        manager
            .connect(&["AA:BB:CC:DD:EE:01".to_owned()])
            .await
            .unwrap();
        wait_for_state(&manager, "AA:BB:CC:DD:EE:01", LinkState::Connected).await;
        settle(|| device.pump_running()).await;

        assert!(matches!(rx.recv().await, Ok(Event::Connecting { .. })));
        assert!(matches!(rx.recv().await, Ok(Event::Connected { .. })));
        assert!(matches!(
            rx.recv().await,
            Ok(Event::ServicesDiscovered { .. })
        ));
        assert!(manager
            .characteristics("AA:BB:CC:DD:EE:01")
            .await
            .contains(&UART_RX));
    }

    #[tokio::test]
    async fn connect_is_idempotent_per_address() {
        let resolver = Arc::new(MockResolver::new());
        let device = resolver.add_device("AA:BB:CC:DD:EE:02");
        let (manager, _sink) = manager_with(resolver);

        let addresses = vec!["AA:BB:CC:DD:EE:02".to_owned()];
        manager.connect(&addresses).await.unwrap();
        wait_for_state(&manager, "AA:BB:CC:DD:EE:02", LinkState::Connected).await;
        manager.connect(&addresses).await.unwrap();
        manager.connect(&addresses).await.unwrap();

        assert_eq!(device.connect_calls(), 1);
    }

    #[tokio::test]
    async fn frames_flow_to_sink_in_batches() {
        let resolver = Arc::new(MockResolver::new());
        let device = resolver.add_device("AA:BB:CC:DD:EE:03");
        let (manager, sink) = manager_with(resolver);

        manager
            .connect(&["AA:BB:CC:DD:EE:03".to_owned()])
            .await
            .unwrap();
        wait_for_state(&manager, "AA:BB:CC:DD:EE:03", LinkState::Connected).await;
        settle(|| device.pump_running()).await;
        manager
            .enable_notifications("AA:BB:CC:DD:EE:03")
            .await
            .unwrap();

        for _ in 0..9 {
            device.inject(UART_RX, vec![0u8; FRAME_LEN]);
        }
        // Give the pump a chance; nine samples must not flush.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.count(), 0);

        device.inject(UART_RX, vec![0u8; FRAME_LEN]);
        settle(|| sink.count() == 10).await;
    }

    #[tokio::test]
    async fn disconnect_reports_user_request() {
        let resolver = Arc::new(MockResolver::new());
        resolver.add_device("AA:BB:CC:DD:EE:04");
        let (manager, _sink) = manager_with(resolver);

        manager
            .connect(&["AA:BB:CC:DD:EE:04".to_owned()])
            .await
            .unwrap();
        wait_for_state(&manager, "AA:BB:CC:DD:EE:04", LinkState::Connected).await;

        let mut rx = manager.subscribe();
        manager
            .disconnect(&["AA:BB:CC:DD:EE:04".to_owned()])
            .await
            .unwrap();

        assert_eq!(
            manager.state("AA:BB:CC:DD:EE:04").await,
            Some(LinkState::Disconnected)
        );
        loop {
            match rx.recv().await.unwrap() {
                Event::Disconnected { reason, .. } => {
                    assert_eq!(reason, DisconnectReason::UserRequested);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn forget_drops_in_flight_payloads() {
        let resolver = Arc::new(MockResolver::new());
        let device = resolver.add_device("AA:BB:CC:DD:EE:05");
        let (manager, sink) = manager_with(resolver);

        manager
            .connect(&["AA:BB:CC:DD:EE:05".to_owned()])
            .await
            .unwrap();
        wait_for_state(&manager, "AA:BB:CC:DD:EE:05", LinkState::Connected).await;
        settle(|| device.pump_running()).await;

        manager.forget("AA:BB:CC:DD:EE:05").await.unwrap();
        assert!(manager.state("AA:BB:CC:DD:EE:05").await.is_none());

        // Payloads after forget never reach the sink.
        for _ in 0..20 {
            device.inject(UART_RX, vec![0u8; FRAME_LEN]);
        }
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.count(), 0);

        let err = manager.forget("AA:BB:CC:DD:EE:05").await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
    }

    #[tokio::test]
    async fn forget_during_discovery_leaves_no_routing_state() {
        let resolver = Arc::new(MockResolver::new());
        let device = resolver.add_device("AA:BB:CC:DD:EE:09");
        device.hold_discovery();
        let (manager, _sink) = manager_with(resolver);

        manager
            .connect(&["AA:BB:CC:DD:EE:09".to_owned()])
            .await
            .unwrap();
        // The record goes Connected before discovery completes.
        wait_for_state(&manager, "AA:BB:CC:DD:EE:09", LinkState::Connected).await;

        manager.forget("AA:BB:CC:DD:EE:09").await.unwrap();
        device.release_discovery();
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        // Discovery finishing after the forget must not resurrect
        // routing state for the removed address.
        assert!(!manager.router.is_registered("AA:BB:CC:DD:EE:09"));
        assert!(manager.state("AA:BB:CC:DD:EE:09").await.is_none());
    }

    #[tokio::test]
    async fn command_writes_are_chunked() {
        let resolver = Arc::new(MockResolver::new());
        let device = resolver.add_device("AA:BB:CC:DD:EE:06");
        let (manager, _sink) = manager_with(resolver);

        manager
            .connect(&["AA:BB:CC:DD:EE:06".to_owned()])
            .await
            .unwrap();
        wait_for_state(&manager, "AA:BB:CC:DD:EE:06", LinkState::Connected).await;

        let payload: Vec<u8> = (0..45).collect();
        manager
            .send_command("AA:BB:CC:DD:EE:06", &payload)
            .await
            .unwrap();

        let writes = device.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].1.len(), 20);
        assert_eq!(writes[1].1.len(), 20);
        assert_eq!(writes[2].1.len(), 5);
        assert!(writes.iter().all(|(c, _)| *c == UART_TX));
    }

    #[tokio::test]
    async fn notifications_require_discovered_characteristic() {
        let resolver = Arc::new(MockResolver::new());
        resolver.add_device("AA:BB:CC:DD:EE:07");
        let (manager, _sink) = manager_with(resolver);

        manager
            .connect(&["AA:BB:CC:DD:EE:07".to_owned()])
            .await
            .unwrap();
        wait_for_state(&manager, "AA:BB:CC:DD:EE:07", LinkState::Connected).await;

        let bogus = uuid::uuid!("00000000-0000-0000-0000-00000000beef");
        let err = manager
            .set_notifications("AA:BB:CC:DD:EE:07", bogus, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
    }

    #[tokio::test]
    async fn operations_on_disconnected_device_fail() {
        let resolver = Arc::new(MockResolver::new());
        resolver.add_device("AA:BB:CC:DD:EE:08");
        let (manager, _sink) = manager_with(resolver);

        manager
            .connect(&["AA:BB:CC:DD:EE:08".to_owned()])
            .await
            .unwrap();
        wait_for_state(&manager, "AA:BB:CC:DD:EE:08", LinkState::Connected).await;
        manager
            .disconnect(&["AA:BB:CC:DD:EE:08".to_owned()])
            .await
            .unwrap();

        let err = manager
            .send_command("AA:BB:CC:DD:EE:08", &[1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
    }
}

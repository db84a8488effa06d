//! Native BLE stack implementation of the link traits.
//!
//! Built on btleplug. [`BleResolver`] wraps one adapter and resolves
//! addresses to [`BleLink`] handles; discovery helpers live here too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};
use uuid::Uuid;

use kinelog_types::uuids::UART_SERVICE;

use crate::error::{Error, Result};
use crate::link::{LinkResolver, NotificationStream, SensorLink};

/// Options for device discovery.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long to scan for devices.
    pub duration: Duration,
    /// Only return devices advertising the sensor's UART service.
    pub sensors_only: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            sensors_only: true,
        }
    }
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Report every BLE device in range, not just sensor units.
    pub fn all_devices(mut self) -> Self {
        self.sensors_only = false;
        self
    }
}

/// A device seen during a scan.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// BLE address as a string.
    pub address: String,
    /// Signal strength at scan time.
    pub rssi: Option<i16>,
    /// Whether the advertisement carried the sensor UART service.
    pub is_sensor: bool,
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(Error::AdapterUnavailable)
}

/// Scan for sensor units in range.
///
/// An empty list means nothing was found, not an error.
pub async fn scan(options: ScanOptions) -> Result<Vec<DiscoveredDevice>> {
    let adapter = get_adapter().await?;
    scan_with_adapter(&adapter, options).await
}

/// Scan using a specific adapter.
pub async fn scan_with_adapter(
    adapter: &Adapter,
    options: ScanOptions,
) -> Result<Vec<DiscoveredDevice>> {
    info!(duration_secs = options.duration.as_secs(), "starting scan");
    adapter.start_scan(ScanFilter::default()).await?;
    sleep(options.duration).await;
    adapter.stop_scan().await?;

    let mut discovered = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };
        let is_sensor = properties.services.contains(&UART_SERVICE);
        if options.sensors_only && !is_sensor {
            continue;
        }
        discovered.push(DiscoveredDevice {
            name: properties.local_name.clone(),
            address: properties.address.to_string(),
            rssi: properties.rssi,
            is_sensor,
        });
    }
    info!(count = discovered.len(), "scan complete");
    Ok(discovered)
}

/// Resolver over one native adapter.
pub struct BleResolver {
    adapter: Adapter,
    /// Scan budget used when an address is not already known to the
    /// adapter cache.
    rescan: Duration,
}

impl BleResolver {
    /// Acquire the first adapter on the system.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            rescan: Duration::from_secs(5),
        }
    }

    pub fn rescan_duration(mut self, rescan: Duration) -> Self {
        self.rescan = rescan;
        self
    }

    async fn lookup(&self, address: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            if properties.address.to_string().eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LinkResolver for BleResolver {
    async fn adapter_ready(&self) -> Result<()> {
        // Any adapter query fails when the radio is off or missing.
        self.adapter
            .adapter_info()
            .await
            .map(|_| ())
            .map_err(|_| Error::AdapterUnavailable)
    }

    async fn resolve(&self, address: &str) -> Result<Arc<dyn SensorLink>> {
        // Cache first, then one short scan to refresh it.
        let peripheral = match self.lookup(address).await? {
            Some(peripheral) => peripheral,
            None => {
                debug!(address, "not in adapter cache, rescanning");
                self.adapter.start_scan(ScanFilter::default()).await?;
                sleep(self.rescan).await;
                self.adapter.stop_scan().await?;
                self.lookup(address)
                    .await?
                    .ok_or_else(|| Error::device_not_found(address))?
            }
        };
        Ok(Arc::new(BleLink::new(address.to_owned(), peripheral)))
    }
}

/// [`SensorLink`] over a btleplug peripheral.
pub struct BleLink {
    address: String,
    peripheral: Peripheral,
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    operation_timeout: Duration,
}

impl BleLink {
    pub fn new(address: String, peripheral: Peripheral) -> Self {
        Self {
            address,
            peripheral,
            characteristics: RwLock::new(HashMap::new()),
            operation_timeout: Duration::from_secs(10),
        }
    }

    async fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .await
            .get(&uuid)
            .cloned()
            .ok_or(Error::CharacteristicNotFound { uuid })
    }
}

#[async_trait]
impl SensorLink for BleLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<()> {
        timeout(self.operation_timeout, self.peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect", self.operation_timeout))??;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        timeout(self.operation_timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.operation_timeout))??;

        let mut cache = HashMap::new();
        let mut uuids = Vec::new();
        for service in self.peripheral.services() {
            debug!(address = %self.address, service = %service.uuid, "service");
            for characteristic in service.characteristics {
                uuids.push(characteristic.uuid);
                cache.insert(characteristic.uuid, characteristic);
            }
        }
        *self.characteristics.write().await = cache;
        Ok(uuids)
    }

    async fn set_notify(&self, characteristic: Uuid, enabled: bool) -> Result<()> {
        let characteristic = self.find_characteristic(characteristic).await?;
        if enabled {
            self.peripheral.subscribe(&characteristic).await?;
        } else {
            self.peripheral.unsubscribe(&characteristic).await?;
        }
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        use btleplug::api::WriteType;
        let characteristic = self.find_characteristic(characteristic).await?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let stream = self.peripheral.notifications().await?;
        Ok(Box::pin(stream.map(|n| (n.uuid, n.value))))
    }
}

//! Routing of inbound notifications to decode and storage.
//!
//! The router owns the registry of addresses that are allowed to produce
//! data. Notification pumps feed it raw payloads; anything from an
//! address that is not registered (typically a callback racing a forget)
//! is dropped here, on the spot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use kinelog_types::{frame, uuids, Sample};

use crate::buffer::SampleBuffer;
use crate::error::Result;
use crate::events::{Event, EventDispatcher};
use crate::link::SensorLink;
use crate::util;

/// Dispatches raw notification payloads: registered addresses get their
/// frames decoded and buffered, everything else is discarded.
pub struct NotificationRouter {
    /// Registered addresses and their characteristic enable flags.
    registry: Mutex<HashMap<String, HashMap<Uuid, bool>>>,
    events: EventDispatcher,
    buffer: Arc<SampleBuffer>,
}

impl NotificationRouter {
    pub fn new(events: EventDispatcher, buffer: Arc<SampleBuffer>) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            events,
            buffer,
        }
    }

    /// Register an address with the characteristics discovered on it.
    ///
    /// All characteristics start disabled; [`set_enabled`](Self::set_enabled)
    /// flips them as notifications are switched on. Re-registering an
    /// address resets its flags.
    pub fn register_address(&self, address: &str, characteristics: &[Uuid]) {
        let flags = characteristics.iter().map(|&c| (c, false)).collect();
        self.lock_registry().insert(address.to_owned(), flags);
        debug!(address, count = characteristics.len(), "address registered");
    }

    /// Drop an address from the registry. Payloads still in flight for it
    /// will be discarded by [`route`](Self::route).
    pub fn clear_address(&self, address: &str) {
        if self.lock_registry().remove(address).is_some() {
            debug!(address, "address cleared");
        }
    }

    /// Record the notification enable state for one characteristic.
    pub fn set_enabled(&self, address: &str, characteristic: Uuid, enabled: bool) {
        let mut registry = self.lock_registry();
        if let Some(flags) = registry.get_mut(address) {
            flags.insert(characteristic, enabled);
        }
    }

    /// Whether notifications are currently recorded as enabled.
    pub fn is_enabled(&self, address: &str, characteristic: Uuid) -> bool {
        self.lock_registry()
            .get(address)
            .and_then(|flags| flags.get(&characteristic))
            .copied()
            .unwrap_or(false)
    }

    /// Whether the address is registered at all.
    pub fn is_registered(&self, address: &str) -> bool {
        self.lock_registry().contains_key(address)
    }

    /// Subscribe every notifiable characteristic in `discovered` on the
    /// link and record it. Returns true iff at least one was enabled.
    pub async fn enable_all(
        &self,
        address: &str,
        link: &Arc<dyn SensorLink>,
        discovered: &[Uuid],
    ) -> Result<bool> {
        let mut any = false;
        for characteristic in discovered.iter().filter(|c| uuids::is_notifiable(c)) {
            link.set_notify(*characteristic, true).await?;
            self.set_enabled(address, *characteristic, true);
            any = true;
        }
        Ok(any)
    }

    /// Flip every tracked characteristic's notification state on the
    /// link (pause/resume without losing the tracked set). Returns true
    /// iff at least one was toggled.
    pub async fn toggle_all(&self, address: &str, link: &Arc<dyn SensorLink>) -> Result<bool> {
        let tracked: Vec<(Uuid, bool)> = {
            let registry = self.lock_registry();
            match registry.get(address) {
                Some(flags) => flags
                    .iter()
                    .filter(|(c, _)| uuids::is_notifiable(c))
                    .map(|(&c, &e)| (c, e))
                    .collect(),
                None => Vec::new(),
            }
        };
        let mut any = false;
        for (characteristic, enabled) in tracked {
            link.set_notify(characteristic, !enabled).await?;
            self.set_enabled(address, characteristic, !enabled);
            any = true;
        }
        Ok(any)
    }

    /// Handle one inbound payload from `address`.
    ///
    /// Emits [`Event::DataAvailable`] with the raw bytes, stamps the
    /// frame with the arrival time, decodes it, and pushes the sample
    /// into the batch buffer. Decode failures are logged and skipped; a
    /// failed batch flush surfaces as [`Event::Error`].
    pub fn route(&self, address: &str, characteristic: Uuid, bytes: &[u8]) {
        if !self.is_registered(address) {
            // Stale callback: the device was forgotten while this
            // payload was in flight.
            trace!(address, "payload from unregistered address dropped");
            return;
        }

        self.events.send(Event::DataAvailable {
            address: address.to_owned(),
            hex: util::hex_string(bytes),
            bytes: bytes.to_vec(),
        });

        let sample = match frame::decode(bytes, util::now_millis()) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(address, %characteristic, %err, "frame rejected");
                return;
            }
        };

        self.push(address, sample);
    }

    fn push(&self, address: &str, sample: Sample) {
        if let Err(err) = self.buffer.push(sample) {
            warn!(address, %err, "sample batch lost");
            self.events.send(Event::Error {
                address: address.to_owned(),
                error: err.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("registered", &self.lock_registry().len())
            .finish_non_exhaustive()
    }
}

impl NotificationRouter {
    fn lock_registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<Uuid, bool>>> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

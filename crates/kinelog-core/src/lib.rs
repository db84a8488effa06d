//! BLE connection and recording engine for kinelog kinematic sensors.
//!
//! This crate owns the device-facing half of kinelog:
//!
//! - **Connection management**: per-address connection lifecycle for any
//!   number of sensors, with reconnect, forget, and stale-callback
//!   handling ([`ConnectionManager`])
//! - **Notification routing**: subscription bookkeeping per device and
//!   demultiplexing of inbound notification payloads
//!   ([`NotificationRouter`])
//! - **Sample buffering**: fixed-capacity batching of decoded samples
//!   into an injected storage sink ([`SampleBuffer`])
//! - **Events**: a broadcast channel carrying connection and data events
//!   to UI/export consumers ([`Event`], [`EventDispatcher`])
//!
//! The native BLE stack is reached through the [`SensorLink`] /
//! [`LinkResolver`] traits; the `ble` module provides the btleplug
//! implementation and `mock` provides in-process doubles for tests.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use kinelog_core::{ConnectionManager, ManagerConfig, SampleBuffer, ble::BleResolver};
//! # struct NullSink;
//! # impl kinelog_types::SampleSink for NullSink {
//! #     fn insert_batch(&self, s: &[kinelog_types::Sample]) -> Result<usize, kinelog_types::SinkError> { Ok(s.len()) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = Arc::new(BleResolver::new().await?);
//!     let buffer = Arc::new(SampleBuffer::new(Arc::new(NullSink)));
//!     let manager = Arc::new(ConnectionManager::new(
//!         resolver,
//!         buffer,
//!         ManagerConfig::default(),
//!     ));
//!
//!     let mut events = manager.subscribe();
//!     manager.connect(&["AA:BB:CC:DD:EE:FF".to_string()]).await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod buffer;
pub mod error;
pub mod events;
pub mod link;
pub mod manager;
pub mod mock;
pub mod router;
pub mod util;

pub use buffer::SampleBuffer;
pub use error::{Error, Result};
pub use events::{DisconnectReason, Event, EventDispatcher};
pub use link::{LinkResolver, NotificationStream, SensorLink};
pub use manager::{ConnectionManager, LinkState, ManagerConfig};
pub use router::NotificationRouter;

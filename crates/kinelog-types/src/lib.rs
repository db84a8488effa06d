//! Platform-agnostic types for kinelog kinematic sensors.
//!
//! This crate provides the shared types used by the BLE side
//! (kinelog-core) and the persistence side (kinelog-store):
//!
//! - [`Sample`]: one decoded nine-channel kinematic reading
//! - [`frame::decode`]: the 16-byte wire frame decoder
//! - UUID constants for the sensor's UART service
//! - The [`SampleSink`] trait that decouples sample producers from the
//!   storage backend
//!
//! # Example
//!
//! ```
//! use kinelog_types::frame;
//!
//! let wire = [0u8; 16];
//! let sample = frame::decode(&wire, 1_000).unwrap();
//! assert_eq!(sample.time, 1_000);
//! ```

pub mod error;
pub mod frame;
pub mod sink;
pub mod types;
pub mod uuid;

pub use error::{DecodeError, SinkError};
pub use sink::SampleSink;
pub use types::Sample;
pub use uuid as uuids;

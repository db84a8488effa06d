//! Error types for frame decoding and sample persistence.

use thiserror::Error;

/// Errors that can occur when decoding a wire frame.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame carried fewer bytes than a full sample.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Required frame length.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },
}

/// Error reported by a [`crate::SampleSink`] when a batch insert fails.
///
/// The whole batch is rolled back; `timestamp` names the offending row
/// when the backend can identify it.
#[derive(Debug, Clone, Error)]
#[error("batch insert failed: {message}")]
pub struct SinkError {
    /// Timestamp of the row that caused the failure, if known.
    pub timestamp: Option<i64>,
    /// Backend error description.
    pub message: String,
}

impl SinkError {
    /// Create a sink error with no row attribution.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            message: message.into(),
        }
    }

    /// Create a sink error naming the failing row.
    pub fn at_row(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp: Some(timestamp),
            message: format!("row {timestamp}: {}", message.into()),
        }
    }
}

//! Storage seam for decoded samples.

use crate::error::SinkError;
use crate::types::Sample;

/// Destination for flushed sample batches.
///
/// The BLE side never sees a concrete database: the buffer hands full
/// batches to whatever sink was injected at construction. The SQLite
/// store implements this trait; tests use an in-memory double.
///
/// Implementations must be callable from any thread, since flushes happen on
/// whichever notification task fills the buffer.
pub trait SampleSink: Send + Sync {
    /// Persist a batch atomically.
    ///
    /// All-or-nothing: on failure no sample from the batch may be
    /// visible, and the error names the failing row when known. Returns
    /// the number of rows written.
    fn insert_batch(&self, samples: &[Sample]) -> Result<usize, SinkError>;
}

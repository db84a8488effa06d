//! Fixed-capacity sample batching.

use std::sync::Arc;
use std::sync::Mutex;

use tracing::{debug, warn};

use kinelog_types::{Sample, SampleSink, SinkError};

/// Default number of samples per flushed batch.
pub const DEFAULT_CAPACITY: usize = 10;

/// Accumulates decoded samples and flushes them to the injected sink in
/// fixed-size batches.
///
/// `push` may be called concurrently from any number of notification
/// tasks; a single mutex covers both the slot array and the flush, so
/// every pushed sample lands in exactly one batch and batches reach the
/// sink in completion order. The flush runs synchronously on whichever
/// task fills the last slot.
pub struct SampleBuffer {
    slots: Mutex<Vec<Sample>>,
    capacity: usize,
    sink: Arc<dyn SampleSink>,
}

impl SampleBuffer {
    /// Create a buffer with [`DEFAULT_CAPACITY`].
    pub fn new(sink: Arc<dyn SampleSink>) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, sink)
    }

    /// Create a buffer with a custom capacity (must be non-zero).
    pub fn with_capacity(capacity: usize, sink: Arc<dyn SampleSink>) -> Self {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            sink,
        }
    }

    /// Append a sample; flush the whole batch when the last slot fills.
    ///
    /// On flush failure the batch has already been rolled back by the
    /// sink and is dropped here after the error is reported; the buffer
    /// never carries more than `capacity` samples.
    pub fn push(&self, sample: Sample) -> Result<(), SinkError> {
        let mut slots = self.lock_slots();
        slots.push(sample);
        if slots.len() < self.capacity {
            return Ok(());
        }

        let batch = std::mem::replace(&mut *slots, Vec::with_capacity(self.capacity));
        match self.sink.insert_batch(&batch) {
            Ok(written) => {
                debug!(written, "flushed full sample batch");
                Ok(())
            }
            Err(err) => {
                warn!(%err, dropped = batch.len(), "batch flush failed");
                Err(err)
            }
        }
    }

    /// Flush a partial batch (shutdown path). Returns the number of
    /// samples handed to the sink; zero when the buffer was empty.
    pub fn flush(&self) -> Result<usize, SinkError> {
        let batch = {
            let mut slots = self.lock_slots();
            if slots.is_empty() {
                return Ok(0);
            }
            std::mem::take(&mut *slots)
        };
        let written = self.sink.insert_batch(&batch)?;
        debug!(written, "flushed partial sample batch");
        Ok(written)
    }

    /// Number of samples currently buffered.
    pub fn pending(&self) -> usize {
        self.lock_slots().len()
    }

    /// Batch capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<Sample>> {
        // A panic mid-push cannot leave the slot array inconsistent, so
        // a poisoned lock is still usable.
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("capacity", &self.capacity)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Test sink that records every batch it receives.
    #[derive(Default)]
    struct RecordingSink {
        batches: StdMutex<Vec<Vec<Sample>>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingSink {
        fn batches(&self) -> Vec<Vec<Sample>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl SampleSink for RecordingSink {
        fn insert_batch(&self, samples: &[Sample]) -> Result<usize, SinkError> {
            if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(SinkError::new("injected failure"));
            }
            self.batches.lock().unwrap().push(samples.to_vec());
            Ok(samples.len())
        }
    }

    fn sample(time: i64) -> Sample {
        Sample::zeroed(time)
    }

    #[test]
    fn nine_pushes_do_not_flush() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = SampleBuffer::new(sink.clone());

        for t in 0..9 {
            buffer.push(sample(t)).unwrap();
        }

        assert!(sink.batches().is_empty());
        assert_eq!(buffer.pending(), 9);
    }

    #[test]
    fn tenth_push_flushes_all_ten_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = SampleBuffer::new(sink.clone());

        for t in 0..10 {
            buffer.push(sample(t)).unwrap();
        }

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let times: Vec<i64> = batches[0].iter().map(|s| s.time).collect();
        assert_eq!(times, (0..10).collect::<Vec<_>>());
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn explicit_flush_drains_partial_batch() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = SampleBuffer::new(sink.clone());

        for t in 0..3 {
            buffer.push(sample(t)).unwrap();
        }
        assert_eq!(buffer.flush().unwrap(), 3);
        assert_eq!(buffer.pending(), 0);
        assert_eq!(sink.batches().len(), 1);

        // Flushing an empty buffer is a no-op.
        assert_eq!(buffer.flush().unwrap(), 0);
        assert_eq!(sink.batches().len(), 1);
    }

    #[test]
    fn concurrent_pushes_lose_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = Arc::new(SampleBuffer::new(sink.clone()));

        let mut handles = Vec::new();
        for worker in 0..4 {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    buffer.push(sample(worker * 1000 + i)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 1000 pushes at capacity 10: exactly 100 full batches, none
        // partial, every sample in exactly one batch.
        let batches = sink.batches();
        assert_eq!(batches.len(), 100);
        assert!(batches.iter().all(|b| b.len() == 10));
        let mut seen: Vec<i64> = batches.iter().flatten().map(|s| s.time).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn failed_flush_reports_and_resets() {
        let sink = Arc::new(RecordingSink::default());
        let buffer = SampleBuffer::new(sink.clone());
        sink.fail.store(true, std::sync::atomic::Ordering::Relaxed);

        for t in 0..9 {
            buffer.push(sample(t)).unwrap();
        }
        assert!(buffer.push(sample(9)).is_err());
        // Batch dropped after rollback; buffer stays within capacity.
        assert_eq!(buffer.pending(), 0);
    }
}

//! Main store implementation.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use kinelog_types::{Sample, SampleSink, SinkError};

use crate::error::{Error, Result};
use crate::schema;

/// SQLite-based store for decoded kinematic samples.
///
/// The connection is wrapped in a mutex, so one store instance runs at
/// most one transaction at a time and is safe to share across tasks.
/// Implements [`SampleSink`], so it plugs directly into the recording
/// pipeline's batch buffer.
pub struct SampleStore {
    conn: Mutex<Connection>,
}

impl SampleStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a batch of samples in one transaction.
    ///
    /// All-or-nothing: any failing row rolls the whole batch back, and
    /// the error names that row's timestamp. A sample whose timestamp
    /// already exists replaces the stored row rather than duplicating it.
    pub fn insert_batch(&self, samples: &[Sample]) -> Result<usize> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO samples
                 (time, acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z, pitch, roll, force)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for sample in samples {
                stmt.execute(rusqlite::params![
                    sample.time,
                    sample.accel_x,
                    sample.accel_y,
                    sample.accel_z,
                    sample.gyro_x,
                    sample.gyro_y,
                    sample.gyro_z,
                    sample.pitch,
                    sample.roll,
                    sample.force,
                ])
                .map_err(|source| Error::InsertRow {
                    time: sample.time,
                    source,
                })?;
            }
        }
        tx.commit()?;
        debug!(count = samples.len(), "batch inserted");
        Ok(samples.len())
    }

    /// Samples with `time` in the half-open range `[min, max)`, ordered
    /// by time.
    pub fn range_query(&self, min: i64, max: i64) -> Result<Vec<Sample>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT time, acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z, pitch, roll, force
             FROM samples WHERE time >= ?1 AND time < ?2 ORDER BY time ASC",
        )?;
        let rows = stmt.query_map([min, max], row_to_sample)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The first stored sample of each non-empty `window`-sized slice of
    /// `[min, max)`. Empty windows produce nothing.
    pub fn first_per_window(&self, min: i64, max: i64, window: i64) -> Result<Vec<Sample>> {
        check_window(window)?;
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT time, acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z, pitch, roll, force
             FROM samples WHERE time >= ?1 AND time < ?2 ORDER BY time ASC LIMIT 1",
        )?;

        let mut out = Vec::new();
        let mut start = min;
        while start < max {
            let end = (start + window).min(max);
            let mut rows = stmt.query_map([start, end], row_to_sample)?;
            if let Some(row) = rows.next() {
                out.push(row?);
            }
            start = end;
        }
        Ok(out)
    }

    /// One synthetic sample per `window`-sized slice of `[min, max)`:
    /// channels are arithmetic means over the window, stamped with the
    /// window's last-seen row time.
    ///
    /// An empty window yields a zero-filled sample stamped at the window
    /// start, so downsampled series keep a fixed cadence. Callers that
    /// want gaps instead should use [`first_per_window`](Self::first_per_window).
    pub fn mean_per_window(&self, min: i64, max: i64, window: i64) -> Result<Vec<Sample>> {
        check_window(window)?;
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*), MAX(time),
                    AVG(acc_x), AVG(acc_y), AVG(acc_z),
                    AVG(gyro_x), AVG(gyro_y), AVG(gyro_z),
                    AVG(pitch), AVG(roll), AVG(force)
             FROM samples WHERE time >= ?1 AND time < ?2",
        )?;

        let mut out = Vec::new();
        let mut start = min;
        while start < max {
            let end = (start + window).min(max);
            let sample = stmt.query_row([start, end], |row| {
                let count: i64 = row.get(0)?;
                if count == 0 {
                    return Ok(Sample::zeroed(start));
                }
                Ok(Sample {
                    time: row.get(1)?,
                    accel_x: row.get(2)?,
                    accel_y: row.get(3)?,
                    accel_z: row.get(4)?,
                    gyro_x: row.get(5)?,
                    gyro_y: row.get(6)?,
                    gyro_z: row.get(7)?,
                    pitch: row.get(8)?,
                    roll: row.get(9)?,
                    force: row.get(10)?,
                })
            })?;
            out.push(sample);
            start = end;
        }
        Ok(out)
    }

    /// Delete every sample with `time` in `[min, max)`. Returns the
    /// number of rows removed.
    pub fn delete_range(&self, min: i64, max: i64) -> Result<usize> {
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM samples WHERE time >= ?1 AND time < ?2",
            [min, max],
        )?;
        debug!(deleted, min, max, "range deleted");
        Ok(deleted)
    }

    /// Earliest and latest stored timestamps, or `None` when the store
    /// is empty.
    pub fn min_max_time(&self) -> Result<Option<(i64, i64)>> {
        let conn = self.lock_conn();
        let (min, max): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(time), MAX(time) FROM samples",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(min.zip(max))
    }

    /// Total number of stored samples.
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub(crate) fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SampleSink for SampleStore {
    fn insert_batch(&self, samples: &[Sample]) -> std::result::Result<usize, SinkError> {
        SampleStore::insert_batch(self, samples).map_err(|err| match err {
            Error::InsertRow { time, source } => SinkError::at_row(time, source.to_string()),
            other => SinkError::new(other.to_string()),
        })
    }
}

fn check_window(window: i64) -> Result<()> {
    if window <= 0 {
        return Err(Error::InvalidWindow { window });
    }
    Ok(())
}

fn row_to_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sample> {
    Ok(Sample {
        time: row.get(0)?,
        accel_x: row.get(1)?,
        accel_y: row.get(2)?,
        accel_z: row.get(3)?,
        gyro_x: row.get(4)?,
        gyro_y: row.get(5)?,
        gyro_z: row.get(6)?,
        pitch: row.get(7)?,
        roll: row.get(8)?,
        force: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: i64, value: f64) -> Sample {
        Sample {
            time,
            gyro_x: value,
            gyro_y: value,
            gyro_z: value,
            accel_x: value,
            accel_y: value,
            accel_z: value,
            pitch: value,
            roll: value,
            force: value,
        }
    }

    #[test]
    fn insert_then_range_query_is_exact() {
        let store = SampleStore::open_in_memory().unwrap();
        let samples: Vec<Sample> = (0..10).map(|t| sample(t * 100, t as f64)).collect();
        assert_eq!(store.insert_batch(&samples).unwrap(), 10);

        // Half-open: 900 excluded.
        let rows = store.range_query(0, 900).unwrap();
        assert_eq!(rows.len(), 9);
        assert_eq!(rows.first().unwrap().time, 0);
        assert_eq!(rows.last().unwrap().time, 800);
        assert_eq!(rows[3], samples[3]);
    }

    #[test]
    fn colliding_timestamp_overwrites_without_duplicating() {
        let store = SampleStore::open_in_memory().unwrap();
        store.insert_batch(&[sample(1000, 1.0)]).unwrap();
        store.insert_batch(&[sample(1000, 2.0)]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let rows = store.range_query(0, 2000).unwrap();
        assert_eq!(rows[0].pitch, 2.0);
    }

    #[test]
    fn delete_range_is_half_open() {
        let store = SampleStore::open_in_memory().unwrap();
        let samples: Vec<Sample> = (0..5).map(|t| sample(t * 10, 1.0)).collect();
        store.insert_batch(&samples).unwrap();

        assert_eq!(store.delete_range(10, 40).unwrap(), 3);
        let remaining = store.range_query(0, 100).unwrap();
        let times: Vec<i64> = remaining.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0, 40]);

        store.delete_range(0, 100).unwrap();
        assert!(store.range_query(0, 100).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn first_per_window_skips_empty_windows() {
        let store = SampleStore::open_in_memory().unwrap();
        // Windows of 100 over [0, 400): data in windows 0 and 2 only.
        store
            .insert_batch(&[sample(10, 1.0), sample(20, 2.0), sample(250, 3.0)])
            .unwrap();

        let rows = store.first_per_window(0, 400, 100).unwrap();
        let times: Vec<i64> = rows.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![10, 250]);
    }

    #[test]
    fn mean_per_window_is_exact() {
        let store = SampleStore::open_in_memory().unwrap();
        store
            .insert_batch(&[sample(10, 1.0), sample(20, 3.0)])
            .unwrap();

        let rows = store.mean_per_window(0, 100, 100).unwrap();
        assert_eq!(rows.len(), 1);
        // Stamped with the last-seen row time, channels averaged.
        assert_eq!(rows[0].time, 20);
        assert_eq!(rows[0].pitch, 2.0);
        assert_eq!(rows[0].accel_x, 2.0);
    }

    #[test]
    fn empty_window_mean_is_zero_filled_at_window_start() {
        let store = SampleStore::open_in_memory().unwrap();
        store.insert_batch(&[sample(10, 4.0)]).unwrap();

        let rows = store.mean_per_window(0, 200, 100).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time, 10);
        assert_eq!(rows[1], Sample::zeroed(100));
    }

    #[test]
    fn zero_window_is_rejected() {
        let store = SampleStore::open_in_memory().unwrap();
        assert!(matches!(
            store.mean_per_window(0, 100, 0),
            Err(Error::InvalidWindow { .. })
        ));
        assert!(matches!(
            store.first_per_window(0, 100, -5),
            Err(Error::InvalidWindow { .. })
        ));
    }

    #[test]
    fn min_max_time_uses_option_sentinel() {
        let store = SampleStore::open_in_memory().unwrap();
        assert_eq!(store.min_max_time().unwrap(), None);

        store
            .insert_batch(&[sample(500, 1.0), sample(100, 1.0), sample(900, 1.0)])
            .unwrap();
        assert_eq!(store.min_max_time().unwrap(), Some((100, 900)));
    }

    #[test]
    fn sink_error_names_failing_row() {
        // Force a constraint error by dropping the table behind the
        // store's back.
        let store = SampleStore::open_in_memory().unwrap();
        store
            .lock_conn()
            .execute_batch("DROP TABLE samples")
            .unwrap();

        let err = SampleSink::insert_batch(&store, &[sample(777, 1.0)]).unwrap_err();
        assert!(err.to_string().contains("insert"));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        let store = SampleStore::open(&path).unwrap();
        store.insert_batch(&[sample(1, 1.0)]).unwrap();
        assert!(path.exists());
    }
}

//! CSV export and import of stored samples.
//!
//! Column order matches the `samples` table:
//! `time, acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z, pitch, roll, force`.

use std::io;
use std::path::Path;

use tracing::info;

use kinelog_types::Sample;

use crate::error::{Error, Result};
use crate::models::StoredSample;
use crate::store::SampleStore;

/// Batch size used when re-inserting imported rows.
const IMPORT_BATCH: usize = 500;

impl SampleStore {
    /// Export samples in `[min, max)` as CSV to a writer. Returns the
    /// number of rows written.
    pub fn export_csv<W: io::Write>(&self, writer: W, min: i64, max: i64) -> Result<usize> {
        let samples = self.range_query(min, max)?;
        let mut csv = csv::Writer::from_writer(writer);
        for sample in &samples {
            csv.serialize(StoredSample::from(*sample))?;
        }
        csv.flush()?;
        Ok(samples.len())
    }

    /// Export the full store (or a range of it) to a CSV file.
    pub fn export_csv_file<P: AsRef<Path>>(
        &self,
        path: P,
        min: Option<i64>,
        max: Option<i64>,
    ) -> Result<usize> {
        let (min, max) = match (min, max) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                let Some((stored_min, stored_max)) = self.min_max_time()? else {
                    // Nothing stored: produce an empty file.
                    return self.export_csv(std::fs::File::create(path.as_ref())?, 0, 0);
                };
                // max is exclusive, so nudge past the last row.
                (min.unwrap_or(stored_min), max.unwrap_or(stored_max + 1))
            }
        };
        let file = std::fs::File::create(path.as_ref())?;
        let written = self.export_csv(file, min, max)?;
        info!(written, path = %path.as_ref().display(), "export complete");
        Ok(written)
    }

    /// Import CSV from a reader, re-batching rows through the normal
    /// insert path. Returns the number of rows inserted.
    ///
    /// Rows that collide with stored timestamps overwrite them, same as
    /// live recording.
    pub fn import_csv<R: io::Read>(&self, reader: R) -> Result<usize> {
        let mut csv = csv::Reader::from_reader(reader);
        let mut batch: Vec<Sample> = Vec::with_capacity(IMPORT_BATCH);
        let mut imported = 0usize;

        for record in csv.deserialize::<StoredSample>() {
            let row = record.map_err(|err| match err.position() {
                Some(position) => Error::MalformedRecord {
                    line: position.line(),
                    message: err.to_string(),
                },
                None => Error::Csv(err),
            })?;
            batch.push(Sample::from(row));
            if batch.len() == IMPORT_BATCH {
                imported += self.insert_batch(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            imported += self.insert_batch(&batch)?;
        }
        Ok(imported)
    }

    /// Import a CSV file.
    pub fn import_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let file = std::fs::File::open(path.as_ref())?;
        let imported = self.import_csv(io::BufReader::new(file))?;
        info!(imported, path = %path.as_ref().display(), "import complete");
        Ok(imported)
    }
}

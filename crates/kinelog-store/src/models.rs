//! Data models for stored data.

use serde::{Deserialize, Serialize};

use kinelog_types::Sample;

/// A sample row as stored in the database.
///
/// Mirror of [`Sample`] with the column order the `samples` table uses;
/// also the CSV record shape for export/import.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    /// Capture time in unix milliseconds (primary key).
    pub time: i64,
    pub acc_x: f64,
    pub acc_y: f64,
    pub acc_z: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    pub pitch: f64,
    pub roll: f64,
    pub force: f64,
}

impl From<Sample> for StoredSample {
    fn from(sample: Sample) -> Self {
        Self {
            time: sample.time,
            acc_x: sample.accel_x,
            acc_y: sample.accel_y,
            acc_z: sample.accel_z,
            gyro_x: sample.gyro_x,
            gyro_y: sample.gyro_y,
            gyro_z: sample.gyro_z,
            pitch: sample.pitch,
            roll: sample.roll,
            force: sample.force,
        }
    }
}

impl From<StoredSample> for Sample {
    fn from(row: StoredSample) -> Self {
        Self {
            time: row.time,
            accel_x: row.acc_x,
            accel_y: row.acc_y,
            accel_z: row.acc_z,
            gyro_x: row.gyro_x,
            gyro_y: row.gyro_y,
            gyro_z: row.gyro_z,
            pitch: row.pitch,
            roll: row.roll,
            force: row.force,
        }
    }
}

/// An hourly aggregate row.
///
/// Populated by offline analysis jobs, never by the recording path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyRollup {
    /// Hour start in unix milliseconds (primary key).
    pub time: i64,
    pub force_max: Option<f64>,
    pub roll_mean: Option<f64>,
    pub force_variance: Option<f64>,
    pub pitch_variance: Option<f64>,
    pub roll_variance: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_round_trips_through_row() {
        let sample = Sample {
            time: 42,
            gyro_x: 1.0,
            gyro_y: 2.0,
            gyro_z: 3.0,
            accel_x: 4.0,
            accel_y: 5.0,
            accel_z: 6.0,
            pitch: 7.0,
            roll: 8.0,
            force: 9.0,
        };
        let row = StoredSample::from(sample);
        assert_eq!(row.acc_x, 4.0);
        assert_eq!(row.gyro_x, 1.0);
        assert_eq!(Sample::from(row), sample);
    }
}

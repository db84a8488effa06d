//! Core sample type for kinematic sensor data.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of numeric channels carried by a [`Sample`].
pub const CHANNEL_COUNT: usize = 9;

/// One decoded kinematic reading.
///
/// Immutable once constructed; produced by [`crate::frame::decode`] and
/// attributed to the device whose notification carried the frame. The
/// timestamp is wall-clock time at arrival, in unix milliseconds; the
/// sensor itself does not stamp frames.
///
/// `force` is not carried by the 16-byte wire frame; it defaults to 0.0
/// and exists so imports and future frame revisions can populate it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// Capture time, unix milliseconds.
    pub time: i64,
    /// Angular rate, X axis (deg/s, raw sensor units).
    pub gyro_x: f64,
    /// Angular rate, Y axis.
    pub gyro_y: f64,
    /// Angular rate, Z axis.
    pub gyro_z: f64,
    /// Acceleration, X axis (raw sensor units).
    pub accel_x: f64,
    /// Acceleration, Y axis.
    pub accel_y: f64,
    /// Acceleration, Z axis.
    pub accel_z: f64,
    /// Derived pitch angle.
    pub pitch: f64,
    /// Derived roll angle.
    pub roll: f64,
    /// Analog force channel.
    pub force: f64,
}

impl Sample {
    /// Create a sample with all numeric channels zeroed.
    ///
    /// Used by the store as the documented placeholder for windows that
    /// contain no rows.
    pub fn zeroed(time: i64) -> Self {
        Self {
            time,
            gyro_x: 0.0,
            gyro_y: 0.0,
            gyro_z: 0.0,
            accel_x: 0.0,
            accel_y: 0.0,
            accel_z: 0.0,
            pitch: 0.0,
            roll: 0.0,
            force: 0.0,
        }
    }

    /// The nine numeric channels in canonical column order:
    /// accel x/y/z, gyro x/y/z, pitch, roll, force.
    pub fn channels(&self) -> [f64; CHANNEL_COUNT] {
        [
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.gyro_x,
            self.gyro_y,
            self.gyro_z,
            self.pitch,
            self.roll,
            self.force,
        ]
    }

    /// Rebuild a sample from a timestamp and channels in canonical order.
    pub fn from_channels(time: i64, ch: [f64; CHANNEL_COUNT]) -> Self {
        Self {
            time,
            accel_x: ch[0],
            accel_y: ch[1],
            accel_z: ch[2],
            gyro_x: ch[3],
            gyro_y: ch[4],
            gyro_z: ch[5],
            pitch: ch[6],
            roll: ch[7],
            force: ch[8],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_sample_keeps_timestamp() {
        let s = Sample::zeroed(42);
        assert_eq!(s.time, 42);
        assert_eq!(s.channels(), [0.0; CHANNEL_COUNT]);
    }

    #[test]
    fn channels_round_trip() {
        let s = Sample {
            time: 7,
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
        assert_eq!(Sample::from_channels(s.time, s.channels()), s);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn sample_serializes() {
        let s = Sample::zeroed(1000);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"time\":1000"));
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}

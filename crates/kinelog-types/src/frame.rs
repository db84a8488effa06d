//! Wire frame decoding.
//!
//! The sensor streams fixed 16-byte frames over its UART RX
//! characteristic: eight consecutive 16-bit signed fields, each with its
//! bytes swapped on the wire (low byte first, then high byte). Field
//! assignment:
//!
//! | fields | channel        |
//! |--------|----------------|
//! | 0..=2  | gyro x/y/z     |
//! | 3..=5  | accel x/y/z    |
//! | 6      | pitch          |
//! | 7      | roll           |
//!
//! The force channel is not carried by this frame and is left at 0.0.

use crate::error::DecodeError;
use crate::types::Sample;

/// Length of one complete wire frame in bytes.
pub const FRAME_LEN: usize = 16;

/// Number of 16-bit fields in one frame.
pub const FIELD_COUNT: usize = FRAME_LEN / 2;

/// Decode a wire frame into a [`Sample`] stamped with `time_ms`.
///
/// Frames shorter than [`FRAME_LEN`] are rejected with
/// [`DecodeError::TooShort`]. Longer frames are accepted, but only the
/// first [`FRAME_LEN`] bytes are interpreted: some firmware revisions
/// pad notifications to the full ATT payload, so trailing bytes are
/// deliberately ignored rather than treated as corruption.
///
/// Deterministic: the same bytes and timestamp always produce an
/// identical sample.
pub fn decode(frame: &[u8], time_ms: i64) -> Result<Sample, DecodeError> {
    if frame.len() < FRAME_LEN {
        return Err(DecodeError::TooShort {
            expected: FRAME_LEN,
            actual: frame.len(),
        });
    }

    let mut fields = [0.0f64; FIELD_COUNT];
    for (i, field) in fields.iter_mut().enumerate() {
        // Low byte first on the wire.
        *field = i16::from_le_bytes([frame[2 * i], frame[2 * i + 1]]) as f64;
    }

    Ok(Sample {
        time: time_ms,
        gyro_x: fields[0],
        gyro_y: fields[1],
        gyro_z: fields[2],
        accel_x: fields[3],
        accel_y: fields[4],
        accel_z: fields[5],
        pitch: fields[6],
        roll: fields[7],
        force: 0.0,
    })
}

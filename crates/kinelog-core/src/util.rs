//! Small shared helpers.

use time::OffsetDateTime;

/// Current wall-clock time in unix milliseconds.
///
/// Used to stamp samples at arrival; the sensor does not timestamp
/// frames itself.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Format bytes as space-separated uppercase hex octets ("0A FF 03").
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

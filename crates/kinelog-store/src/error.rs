//! Error types for kinelog-store.

use std::path::PathBuf;

/// Result type for kinelog-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in kinelog-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A row in a batch insert failed; names the offending timestamp.
    #[error("insert failed at row {time}: {source}")]
    InsertRow {
        time: i64,
        source: rusqlite::Error,
    },

    /// Windowed query called with a non-positive window length.
    #[error("window length must be positive, got {window}")]
    InvalidWindow { window: i64 },

    /// A CSV record could not be parsed.
    #[error("malformed CSV record at line {line}: {message}")]
    MalformedRecord { line: u64, message: String },

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_row_names_the_timestamp() {
        let err = Error::InsertRow {
            time: 1234,
            source: rusqlite::Error::InvalidQuery,
        };
        assert!(err.to_string().contains("1234"));
    }
}

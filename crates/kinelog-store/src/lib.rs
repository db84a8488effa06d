//! Local persistence for kinelog kinematic samples.
//!
//! This crate provides SQLite-based storage for the decoded sample
//! stream: batched inserts keyed by capture time, raw and downsampled
//! range queries, bulk deletes, and CSV export/import.
//!
//! # Example
//!
//! ```no_run
//! use kinelog_store::SampleStore;
//!
//! let store = SampleStore::open_default()?;
//!
//! if let Some((min, max)) = store.min_max_time()? {
//!     // One averaged row per second of recording.
//!     let series = store.mean_per_window(min, max + 1, 1_000)?;
//!     println!("{} windows", series.len());
//! }
//! # Ok::<(), kinelog_store::Error>(())
//! ```

mod error;
mod export;
mod models;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{HourlyRollup, StoredSample};
pub use store::SampleStore;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/kinelog/data.db`
/// - macOS: `~/Library/Application Support/kinelog/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\kinelog\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("kinelog")
        .join("data.db")
}

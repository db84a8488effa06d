//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Decoded kinematic samples, keyed by capture time (unix ms).
        -- A colliding timestamp replaces the earlier row.
        CREATE TABLE IF NOT EXISTS samples (
            time INTEGER PRIMARY KEY,
            acc_x REAL NOT NULL,
            acc_y REAL NOT NULL,
            acc_z REAL NOT NULL,
            gyro_x REAL NOT NULL,
            gyro_y REAL NOT NULL,
            gyro_z REAL NOT NULL,
            pitch REAL NOT NULL,
            roll REAL NOT NULL,
            force REAL NOT NULL
        );

        -- Hourly aggregate features. Reserved for analysis jobs; the
        -- recording path never writes here.
        CREATE TABLE IF NOT EXISTS hourly_rollups (
            time INTEGER PRIMARY KEY,
            force_max REAL,
            roll_mean REAL,
            force_variance REAL,
            pitch_variance REAL,
            roll_variance REAL
        );
        "#,
    )?;
    Ok(())
}

/// Run migrations from the given version to the current version.
fn migrate(_conn: &Connection, from_version: i32) -> Result<()> {
    // No migrations yet; SCHEMA_VERSION is still 1.
    tracing::warn!(from_version, "no migration path defined");
    Ok(())
}

//! `SQLite` schema definitions for airlock.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the telemetry table.
///
/// `msg_id` is the primary key: the durable at-most-once guarantee for a
/// logical emission, independent of the in-memory admission filter.
/// `inserted_at` is the receipt-side clock and is assigned by the
/// application with sub-second resolution so arrival order survives.
pub const CREATE_TELEMETRY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS telemetry (
    msg_id TEXT PRIMARY KEY,
    ts REAL,
    altitude REAL,
    speed REAL,
    battery REAL,
    lat REAL,
    lon REAL,
    raw TEXT NOT NULL,
    inserted_at REAL NOT NULL
)
";

/// SQL statement to create an index on `inserted_at` for window queries.
pub const CREATE_INSERTED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_telemetry_inserted_at ON telemetry(inserted_at DESC)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_TELEMETRY_TABLE,
    CREATE_INSERTED_AT_INDEX,
    CREATE_METADATA_TABLE,
];

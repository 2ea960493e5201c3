//! Storage layer for airlock.
//!
//! This module provides `SQLite`-based persistence for admitted telemetry
//! readings. Writes are idempotent on `msg_id`: the primary-key constraint is
//! the authoritative uniqueness guarantee, layered under the ingestion loop's
//! in-memory admission filter. Rows are never updated or deleted by the
//! service; retention is an operational concern outside this crate.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::reading::{Reading, Row};

/// Time-range selector over receipt-side insertion timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    /// No time restriction.
    #[default]
    All,
    /// Rows inserted within the last N minutes.
    LastMinutes(u32),
}

impl Window {
    /// Parse a window selector from a free-form query parameter.
    ///
    /// Absent, empty, `"null"`, non-numeric, and non-positive inputs all mean
    /// "unrestricted". Invalid input is never an error; it falls back to
    /// [`Window::All`].
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::All;
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            return Self::All;
        }
        match trimmed.parse::<u32>() {
            Ok(minutes) if minutes > 0 => Self::LastMinutes(minutes),
            _ => Self::All,
        }
    }

    /// The oldest admissible `inserted_at` for this window, if bounded.
    #[must_use]
    pub fn cutoff(self, now: f64) -> Option<f64> {
        match self {
            Self::All => None,
            Self::LastMinutes(minutes) => Some(now - f64::from(minutes) * 60.0),
        }
    }
}

/// Outcome of an idempotent insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The reading was stored as a new row.
    Inserted,
    /// A row with this `msg_id` already exists; nothing was written.
    AlreadyExists,
}

/// Storage engine for admitted telemetry.
///
/// Each `Store` owns its own `SQLite` connection. WAL mode lets the
/// ingestion loop's writer connection and the query API's reader connection
/// operate on the same file concurrently.
#[derive(Debug)]
pub struct Store {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

const SELECT_COLUMNS: &str = "msg_id, ts, altitude, speed, battery, lat, lon, raw, inserted_at";

impl Store {
    /// Open or create a telemetry database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL so queries can read while the ingestion loop writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert an admitted reading unless its `msg_id` is already stored.
    ///
    /// Uses `INSERT OR IGNORE` so a concurrent duplicate loses the race
    /// silently; the caller sees [`InsertOutcome::AlreadyExists`], which is
    /// success-equivalent because the reading is already durable.
    ///
    /// # Errors
    ///
    /// Returns an error for any database failure other than the duplicate
    /// key, which is not an error.
    pub fn insert_if_absent(
        &self,
        msg_id: &str,
        ts: f64,
        reading: &Reading,
        raw: &str,
        inserted_at: f64,
    ) -> Result<InsertOutcome> {
        let (lat, lon) = reading
            .location
            .map_or((None, None), |loc| (Some(loc.lat), Some(loc.lon)));

        let changed = self.conn.execute(
            r"
            INSERT OR IGNORE INTO telemetry
                (msg_id, ts, altitude, speed, battery, lat, lon, raw, inserted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                msg_id,
                ts,
                reading.altitude,
                reading.speed,
                reading.battery,
                lat,
                lon,
                raw,
                inserted_at,
            ],
        )?;

        if changed == 0 {
            debug!("Skipping duplicate reading with msg_id {msg_id}");
            Ok(InsertOutcome::AlreadyExists)
        } else {
            debug!("Inserted reading with msg_id {msg_id}");
            Ok(InsertOutcome::Inserted)
        }
    }

    /// Get the most recently inserted row within the window, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn latest(&self, window: Window, now: f64) -> Result<Option<Row>> {
        let cutoff = window.cutoff(now);
        let result = self
            .conn
            .query_row(
                &format!(
                    r"
                    SELECT {SELECT_COLUMNS}
                    FROM telemetry
                    WHERE (?1 IS NULL OR inserted_at >= ?1)
                    ORDER BY inserted_at DESC
                    LIMIT 1
                    "
                ),
                params![cutoff],
                Self::row_from_sql,
            )
            .optional()?;
        Ok(result)
    }

    /// Get rows within the window, most recent first, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn range(&self, window: Window, limit: usize, now: f64) -> Result<Vec<Row>> {
        let cutoff = window.cutoff(now);
        let mut stmt = self.conn.prepare(&format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM telemetry
            WHERE (?1 IS NULL OR inserted_at >= ?1)
            ORDER BY inserted_at DESC
            LIMIT ?2
            "
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![cutoff, limit_i64], Self::row_from_sql)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Count total rows in storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Convert a database row to a [`Row`] struct.
    fn row_from_sql(row: &rusqlite::Row) -> rusqlite::Result<Row> {
        Ok(Row {
            msg_id: row.get(0)?,
            ts: row.get(1)?,
            altitude: row.get(2)?,
            speed: row.get(3)?,
            battery: row.get(4)?,
            lat: row.get(5)?,
            lon: row.get(6)?,
            raw: row.get(7)?,
            inserted_at: row.get(8)?,
        })
    }
}

//! Core telemetry types for airlock.
//!
//! This module defines the decoded telemetry record produced by the codec and
//! the stored row shape returned by the storage layer.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A geographic coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
}

/// One decoded telemetry record.
///
/// This is the plaintext a sender encrypts into an envelope. Every field is
/// tolerated-absent at parse time so that a syntactically valid packet always
/// decodes; the admission filter is the layer that rejects records lacking an
/// identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Reading {
    /// Unique token for this emission, never reused by the sender.
    pub msg_id: Option<String>,

    /// Sender-side timestamp in fractional seconds since the Unix epoch.
    pub ts: Option<f64>,

    /// Altitude measurement.
    pub altitude: Option<f64>,

    /// Speed measurement.
    pub speed: Option<f64>,

    /// Battery level measurement.
    pub battery: Option<f64>,

    /// Geographic position, if the sender reported one.
    pub location: Option<Location>,
}

impl Reading {
    /// Parse a decrypted plaintext into a reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] if the plaintext is not a JSON
    /// object with the expected field types.
    pub fn from_plaintext(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::malformed(e.to_string()))
    }

    /// The record's identity, if complete.
    ///
    /// Returns the `(msg_id, ts)` pair only when the id is non-empty and the
    /// timestamp is a finite number.
    #[must_use]
    pub fn identity(&self) -> Option<(&str, f64)> {
        let id = self.msg_id.as_deref().filter(|id| !id.is_empty())?;
        let ts = self.ts.filter(|ts| ts.is_finite())?;
        Some((id, ts))
    }
}

/// A stored telemetry row.
///
/// A reading flattened to its persisted columns, plus the verbatim decrypted
/// plaintext and the receipt-side insertion timestamp used for ordering and
/// window queries. Rows are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    /// Unique message identifier (primary key).
    pub msg_id: String,
    /// Sender-side timestamp in fractional epoch seconds.
    pub ts: Option<f64>,
    /// Altitude measurement.
    pub altitude: Option<f64>,
    /// Speed measurement.
    pub speed: Option<f64>,
    /// Battery level measurement.
    pub battery: Option<f64>,
    /// Latitude in decimal degrees.
    pub lat: Option<f64>,
    /// Longitude in decimal degrees.
    pub lon: Option<f64>,
    /// The decrypted plaintext as received, retained for audit and export.
    pub raw: String,
    /// Receipt-side timestamp in fractional epoch seconds.
    pub inserted_at: f64,
}

/// Current time as fractional seconds since the Unix epoch.
///
/// Receipt-side clock for admission checks and `inserted_at` stamps.
/// Microsecond resolution so rows inserted in quick succession still order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn epoch_now() -> f64 {
    Utc::now().timestamp_micros() as f64 * 1e-6
}

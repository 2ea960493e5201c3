//! Error types for airlock.
//!
//! This module defines all error types used throughout the airlock crate.
//! Per-packet rejections (bad tag, malformed plaintext) are ordinary values
//! here; the ingestion loop logs them and moves on. Only resource-level
//! failures (storage handle gone, socket unusable) are allowed to escape it.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for airlock operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Codec Errors ===
    /// The envelope is too short to contain a nonce and an auth tag.
    #[error("envelope too short: {len} bytes")]
    EnvelopeTooShort {
        /// Length of the rejected envelope.
        len: usize,
    },

    /// The envelope's authentication tag did not verify under the shared key.
    #[error("envelope failed authentication")]
    AuthenticationFailed,

    /// Sealing a plaintext failed (plaintext too large for the cipher).
    #[error("envelope encryption failed")]
    EncryptionFailed,

    /// Decryption succeeded but the plaintext is not a valid telemetry record.
    #[error("malformed payload: {message}")]
    MalformedPayload {
        /// Description of the parse failure.
        message: String,
    },

    /// Key material could not be decoded.
    #[error("invalid key material: {message}")]
    InvalidKey {
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system or socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for airlock operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a malformed-payload error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message: message.into(),
        }
    }

    /// Create an invalid-key error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Check if this error is an envelope authentication failure.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }

    /// Check if this error is a post-decryption parse failure.
    #[must_use]
    pub fn is_malformed_payload(&self) -> bool {
        matches!(self, Self::MalformedPayload { .. })
    }
}

//! `airlock` - encrypted telemetry ingestion and query service
//!
//! This library receives authenticated telemetry envelopes over UDP,
//! rejects replayed and out-of-window packets, persists accepted readings
//! idempotently, and serves time-windowed queries and aggregates over the
//! stored history.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod admission;
pub mod api;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod reading;
pub mod sender;
pub mod storage;

pub use admission::{AdmissionFilter, RejectReason};
pub use codec::{Codec, SecretKey};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use reading::{Location, Reading, Row};
pub use storage::{InsertOutcome, Store, Window};

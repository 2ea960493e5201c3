//! Anti-replay and freshness gate for decoded telemetry.
//!
//! Every decoded reading passes through the [`AdmissionFilter`] before it is
//! persisted. The filter rejects records without an identity, records whose
//! `msg_id` was accepted recently, and records whose sender timestamp falls
//! outside the allowed skew around the receiver's clock.
//!
//! The seen-ID window is a bounded FIFO buffer, not a proof: it lives in
//! process memory and resets on restart, so replay suppression across
//! restarts is best-effort. The storage layer's primary-key constraint is
//! the durable backstop against duplicate rows.

use std::collections::{HashSet, VecDeque};

use crate::reading::Reading;

/// Why a reading was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The reading lacks a usable `msg_id` or timestamp.
    MissingIdentity,
    /// The `msg_id` was already accepted within the seen-ID window.
    Replay,
    /// The sender timestamp is outside the allowed skew around now.
    StaleOrFuture,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentity => write!(f, "missing identity"),
            Self::Replay => write!(f, "replayed message id"),
            Self::StaleOrFuture => write!(f, "stale or future timestamp"),
        }
    }
}

/// Admission gate over a bounded recency window of accepted message ids.
///
/// Owned and mutated exclusively by the ingestion loop; the FIFO eviction is
/// not safe for uncoordinated concurrent mutation, so any parallel ingestion
/// must serialize access to it.
#[derive(Debug)]
pub struct AdmissionFilter {
    /// Maximum tolerated `|now - ts|` in seconds.
    max_skew: f64,
    /// Capacity of the seen-ID window.
    capacity: usize,
    /// Accepted ids in arrival order, oldest first.
    order: VecDeque<String>,
    /// Membership index over `order`.
    seen: HashSet<String>,
}

impl AdmissionFilter {
    /// Create a filter with the given skew bound (seconds) and window size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(max_skew_secs: u64, capacity: usize) -> Self {
        Self {
            max_skew: max_skew_secs as f64,
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity.max(1)),
            seen: HashSet::with_capacity(capacity.max(1)),
        }
    }

    /// Decide whether a reading is admitted at time `now` (epoch seconds).
    ///
    /// Checks run in order: identity, replay, freshness. On acceptance the
    /// reading's id is remembered, evicting the oldest remembered id if the
    /// window is full.
    ///
    /// # Errors
    ///
    /// Returns the [`RejectReason`] for refused readings.
    pub fn admit(&mut self, reading: &Reading, now: f64) -> Result<(), RejectReason> {
        let Some((msg_id, ts)) = reading.identity() else {
            return Err(RejectReason::MissingIdentity);
        };

        if self.seen.contains(msg_id) {
            return Err(RejectReason::Replay);
        }

        if (now - ts).abs() > self.max_skew {
            return Err(RejectReason::StaleOrFuture);
        }

        self.remember(msg_id.to_string());
        Ok(())
    }

    /// Record an accepted id, evicting the oldest entry at capacity.
    fn remember(&mut self, msg_id: String) {
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(msg_id.clone());
        self.order.push_back(msg_id);
    }

    /// Number of ids currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

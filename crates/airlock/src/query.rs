//! Time-windowed retrieval support and statistical aggregation.
//!
//! The storage layer answers "which rows"; this module answers "what do they
//! say": server-side limit clamping for untrusted query parameters, the
//! per-channel aggregate summary served by the stats endpoint, and the
//! delimited-text snapshot used for export.

use serde::Serialize;

use crate::reading::Row;

/// Default number of rows returned by a history query.
pub const HISTORY_DEFAULT_LIMIT: usize = 100;

/// Hard cap on rows returned by a history query.
pub const HISTORY_MAX_LIMIT: usize = 1000;

/// Default number of rows fed into an aggregate computation.
pub const STATS_DEFAULT_CAP: usize = 2000;

/// Hard cap on rows fed into an aggregate computation.
pub const STATS_MAX_CAP: usize = 5000;

/// Default number of rows in an export snapshot.
pub const EXPORT_DEFAULT_LIMIT: usize = 1000;

/// Hard cap on rows in an export snapshot.
pub const EXPORT_MAX_LIMIT: usize = 10_000;

/// Battery level below which a row counts toward the low-battery rate.
pub const LOW_BATTERY_THRESHOLD: f64 = 20.0;

/// Clamp a caller-supplied row limit to `1..=max`.
///
/// Non-numeric input falls back to `default`; numeric input outside the
/// range is clamped. Caller input never produces an error.
#[must_use]
pub fn clamp_limit(raw: Option<&str>, default: usize, max: usize) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(default)
        .clamp(1, max)
}

/// Average, minimum, and maximum over one numeric channel.
///
/// All fields are `None` when no row carried a well-formed value for the
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChannelStats {
    /// Arithmetic mean of the channel's well-formed values.
    pub avg: Option<f64>,
    /// Smallest well-formed value.
    pub min: Option<f64>,
    /// Largest well-formed value.
    pub max: Option<f64>,
}

impl ChannelStats {
    /// Compute stats over the well-formed values of one channel.
    ///
    /// Missing and non-finite values are excluded from the computation, not
    /// coerced to zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn over<I: IntoIterator<Item = Option<f64>>>(values: I) -> Self {
        let values: Vec<f64> = values
            .into_iter()
            .flatten()
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return Self::default();
        }
        let sum: f64 = values.iter().sum();
        Self {
            avg: Some(sum / values.len() as f64),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
        }
    }
}

/// Sender-timestamp summary for an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TimeStats {
    /// Newest sender timestamp among the rows.
    pub latest_ts: Option<f64>,
    /// Oldest sender timestamp among the rows.
    pub earliest_ts: Option<f64>,
    /// Seconds elapsed since the newest sender timestamp.
    pub last_seen_secs_ago: Option<f64>,
}

/// Aggregate summary over a set of stored rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    /// Number of rows the aggregate was computed over.
    pub count: usize,
    /// Sender-timestamp summary.
    pub time: TimeStats,
    /// Altitude channel stats.
    pub altitude: ChannelStats,
    /// Speed channel stats.
    pub speed: ChannelStats,
    /// Battery channel stats.
    pub battery: ChannelStats,
    /// Percentage of rows with a defined battery reading below
    /// [`LOW_BATTERY_THRESHOLD`].
    pub low_battery_rate: f64,
    /// Coordinate pairs ordered oldest to newest, for path reconstruction.
    pub path_sample: Vec<(f64, f64)>,
}

/// Compute an aggregate over rows ordered newest-first.
///
/// `now` is the receiver clock used for `last_seen_secs_ago`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(rows: &[Row], now: f64) -> Aggregate {
    let ts_vals: Vec<f64> = rows.iter().filter_map(|r| r.ts).collect();
    let latest_ts = ts_vals.iter().copied().reduce(f64::max);
    let earliest_ts = ts_vals.iter().copied().reduce(f64::min);

    let batteries: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.battery)
        .filter(|b| b.is_finite())
        .collect();
    let low = batteries
        .iter()
        .filter(|b| **b < LOW_BATTERY_THRESHOLD)
        .count();
    let low_battery_rate = if batteries.is_empty() {
        0.0
    } else {
        low as f64 / batteries.len() as f64 * 100.0
    };

    // Rows arrive newest-first; the path reads oldest-to-newest.
    let path_sample: Vec<(f64, f64)> = rows
        .iter()
        .rev()
        .filter_map(|r| Some((r.lat?, r.lon?)))
        .collect();

    Aggregate {
        count: rows.len(),
        time: TimeStats {
            latest_ts,
            earliest_ts,
            last_seen_secs_ago: latest_ts.map(|ts| now - ts),
        },
        altitude: ChannelStats::over(rows.iter().map(|r| r.altitude)),
        speed: ChannelStats::over(rows.iter().map(|r| r.speed)),
        battery: ChannelStats::over(rows.iter().map(|r| r.battery)),
        low_battery_rate,
        path_sample,
    }
}

/// Render rows as a comma-separated snapshot of the raw columns.
///
/// One header line, then one line per row in the given (newest-first) order.
/// Missing values are left empty.
#[must_use]
pub fn csv_snapshot(rows: &[Row]) -> String {
    fn cell(value: Option<f64>) -> String {
        value.map(|v| v.to_string()).unwrap_or_default()
    }

    let mut out = String::from("msg_id,ts,altitude,speed,battery,lat,lon\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            row.msg_id,
            cell(row.ts),
            cell(row.altitude),
            cell(row.speed),
            cell(row.battery),
            cell(row.lat),
            cell(row.lon),
        ));
    }
    out
}

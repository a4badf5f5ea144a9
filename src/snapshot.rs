//! Externally visible sampling results.
//!
//! `ProcessSnapshot` is the value handed back by every query. `Sample` adds
//! the freshness information that the best-effort query path hides.

use serde::{Deserialize, Serialize};

/// Last known resource usage of one process.
///
/// All rates are in bytes per second. CPU usage is the share of total machine
/// capacity: one saturated core out of four reports `25.0`, all four report
/// `100.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Display name only, never a path. Empty until first resolved.
    pub name: String,
    pub cpu_usage_percent: f64,
    /// Resident working set in bytes.
    pub memory_bytes: u64,
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    /// Half of the combined non-storage I/O rate (see `IoRates::network_split`).
    pub network_sent_bytes_per_sec: f64,
    /// Half of the combined non-storage I/O rate (see `IoRates::network_split`).
    pub network_received_bytes_per_sec: f64,
}

/// Freshness of a cached snapshot at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    /// No refresh has completed yet; all fields hold their defaults.
    Pending,
    /// Last refresh succeeded within the staleness window.
    Fresh,
    /// Last refresh succeeded, but longer ago than the staleness window.
    Stale,
    /// The last refresh could not read the process (exited or access denied).
    /// Fields hold the last values that were read successfully, if any.
    Unavailable,
}

impl SampleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleStatus::Pending => "pending",
            SampleStatus::Fresh => "fresh",
            SampleStatus::Stale => "stale",
            SampleStatus::Unavailable => "unavailable",
        }
    }
}

/// Snapshot plus diagnostics about how current it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub pid: u32,
    pub snapshot: ProcessSnapshot,
    pub status: SampleStatus,
    /// Milliseconds since the last successful refresh, `None` if never refreshed.
    pub age_ms: Option<u64>,
}

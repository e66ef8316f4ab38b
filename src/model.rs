/// Core data types for the carpark availability monitoring service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no logic, no I/O, and no external dependencies beyond chrono —
/// only types.

use chrono::{DateTime, NaiveDate, Utc};

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// A normalized guest-bay availability reading.
///
/// The provider truncates guest availability at a cap (observed cap = 10):
/// once the true count meets or exceeds it, the API reports the cap with a
/// "10+" display string instead of the exact value. `is_capped` records
/// whether that truncation applied, because a capped sample carries no exact
/// utilization information.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityReading {
    /// Exact available count, the cap threshold when capped, or `None` when
    /// the provider reported nothing. Never negative.
    pub actual: Option<i64>,
    /// Human-readable rendering: the decimal count, `"{cap}+"` when capped,
    /// or `"unknown"` when absent.
    pub display: String,
    /// True when `actual` was clamped to the cap threshold.
    pub is_capped: bool,
    /// Total guest capacity, when the provider reports it.
    pub total: Option<i64>,
}

/// A normalized monthly-bay reading.
///
/// Monthly bays use a boolean full flag instead of a numeric cap: when the
/// provider signals "full", `available` is forced to zero regardless of any
/// numeric field present.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyReading {
    pub available: Option<i64>,
    pub is_full: bool,
    pub total: Option<i64>,
}

// ---------------------------------------------------------------------------
// Entity types
// ---------------------------------------------------------------------------

/// Static / slow-changing carpark metadata.
///
/// `id` is the provider's stable external identifier and the join key for
/// all snapshots. Rows are created and updated by the metadata refresh path
/// and never deleted while snapshots reference them.
#[derive(Debug, Clone, PartialEq)]
pub struct Carpark {
    pub id: String,
    pub name_en: Option<String>,
    pub name_zh: Option<String>,
    pub address_en: Option<String>,
    pub address_zh: Option<String>,
    pub district: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub guest_total: Option<i64>,
    pub monthly_total: Option<i64>,
    pub has_ev_charging: bool,
}

/// One immutable observation of a carpark's availability at one instant.
///
/// `scraped_at` is fixed once per poll cycle and shared by every snapshot the
/// cycle produces. `source_last_update` is the upstream system's own
/// timestamp; it may be absent, stale, or skewed relative to `scraped_at` and
/// is stored as informational metadata only.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilitySnapshot {
    pub carpark_id: String,
    pub scraped_at: DateTime<Utc>,
    pub source_last_update: Option<String>,
    pub guest: AvailabilityReading,
    pub monthly: MonthlyReading,
    /// guest.actual + monthly.available, `None` if either side is unknown.
    pub total_available: Option<i64>,
    /// guest.total + monthly.total, `None` if either side is unknown.
    pub total_capacity: Option<i64>,
}

// ---------------------------------------------------------------------------
// Aggregate types
// ---------------------------------------------------------------------------

/// Derived hourly statistics for one carpark, keyed `(carpark_id, date, hour)`.
///
/// Recomputing from the same snapshot window is deterministic and yields
/// identical values; rows are overwritten wholesale, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyAggregate {
    pub carpark_id: String,
    pub date: NaiveDate,
    pub hour: i32,
    /// Min/max/avg over samples with a known (exact or capped) guest value.
    pub min_guest_available: Option<i64>,
    pub max_guest_available: Option<i64>,
    pub avg_guest_available: Option<f64>,
    /// Count of capped samples, regardless of utilization eligibility.
    pub samples_at_capacity: i64,
    pub total_samples: i64,
    /// Utilization from non-capped samples with total > 0 only; `None`
    /// (not zero) when no eligible sample exists.
    pub avg_utilization_pct: Option<f64>,
    pub peak_utilization_pct: Option<f64>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while polling, normalizing, or storing availability
/// data.
///
/// Per-item variants (`MalformedRecord`, `UnknownCarpark`) are recovered
/// locally by the orchestrator — the item is skipped and counted, the cycle
/// continues. Cycle-level variants abort the cycle with no partial writes and
/// surface to the external scheduler; nothing is retried within a cycle.
#[derive(Debug, PartialEq)]
pub enum PollError {
    /// Network failure or non-2xx HTTP response. Aborts the cycle before any
    /// write.
    FetchError(String),
    /// A single API item could not be mapped (e.g. missing carpark_id).
    /// Skip the item, continue the cycle.
    MalformedRecord(String),
    /// A snapshot references a carpark with no metadata row. Skip the item
    /// and log it for a later metadata backfill.
    UnknownCarpark(String),
    /// Bad cap threshold or similar. Fatal at startup, never per-cycle.
    InvalidConfiguration(String),
    /// Datastore connection or statement failure. Aborts the cycle;
    /// retry belongs to the external scheduler.
    StoreUnavailable(String),
    /// Another cycle holds the lock file. The scheduler invoked faster than
    /// a slow cycle completed; this run aborts before fetching.
    CycleInProgress(String),
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::FetchError(msg) => write!(f, "fetch error: {}", msg),
            PollError::MalformedRecord(msg) => write!(f, "malformed record: {}", msg),
            PollError::UnknownCarpark(id) => write!(f, "unknown carpark: {}", id),
            PollError::InvalidConfiguration(msg) => {
                write!(f, "invalid configuration: {}", msg)
            }
            PollError::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
            PollError::CycleInProgress(path) => {
                write!(
                    f,
                    "cycle already in progress (lock file {}; remove it if no cycle is running)",
                    path
                )
            }
        }
    }
}

impl std::error::Error for PollError {}

impl From<reqwest::Error> for PollError {
    fn from(err: reqwest::Error) -> Self {
        PollError::FetchError(err.to_string())
    }
}

impl From<postgres::Error> for PollError {
    fn from(err: postgres::Error) -> Self {
        PollError::StoreUnavailable(err.to_string())
    }
}

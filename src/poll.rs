/// Poll cycle orchestration.
///
/// One cycle runs the state machine
///   FETCHING → NORMALIZING → STORING → (AGGREGATING) → DONE
/// or drops to FAILED from any state. A cycle failure writes nothing: the
/// fetch happens before the store phase opens, and the store phase runs in a
/// single transaction, so an abort rolls back cleanly. Per-item failures
/// (malformed records, unknown carparks, duplicate keys) are skipped and
/// counted without aborting.
///
/// The cycle timestamp is fixed once at FETCHING entry and threaded into the
/// mapper and store as a parameter — lower components never read the clock.
///
/// Retries are not this module's job: a failed cycle surfaces to the external
/// scheduler, whose next invocation is the retry.

use chrono::{DateTime, Utc};
use postgres::Client;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::aggregate;
use crate::config::Config;
use crate::db;
use crate::ingest::wilson;
use crate::logging::{self, DataSource};
use crate::mapper;
use crate::model::PollError;

pub const DEFAULT_LOCK_PATH: &str = "parkmon.lock";

// ---------------------------------------------------------------------------
// Cycle state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Fetching,
    Normalizing,
    Storing,
    Aggregating,
    Done,
    Failed,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Fetching => write!(f, "FETCHING"),
            CycleState::Normalizing => write!(f, "NORMALIZING"),
            CycleState::Storing => write!(f, "STORING"),
            CycleState::Aggregating => write!(f, "AGGREGATING"),
            CycleState::Done => write!(f, "DONE"),
            CycleState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Outcome of one completed cycle, reported to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub scraped_at: DateTime<Utc>,
    pub state: CycleState,
    /// Items received from the API.
    pub scraped: usize,
    /// Snapshots actually inserted.
    pub stored: usize,
    /// Items dropped: malformed, unknown carpark, or duplicate key.
    pub skipped: usize,
    /// Aggregate rows written, when the cycle ran end-of-day aggregation.
    pub aggregates_written: usize,
}

// ---------------------------------------------------------------------------
// Overlap guard
// ---------------------------------------------------------------------------

/// Lock-file guard against overlapping external triggers.
///
/// The scheduler may fire again before a slow cycle finishes; the second
/// invocation must fail fast rather than interleave writes. The lock is held
/// for the cycle lifetime and released on all exit paths via `Drop`.
#[derive(Debug)]
pub struct CycleLock {
    path: PathBuf,
}

impl CycleLock {
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self, PollError> {
        let path = path.as_ref().to_path_buf();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Record the holder so a lock left behind by a crashed cycle
                // can be traced to its process and removed.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(CycleLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                let detail = match holder {
                    Some(pid) => format!("{}, held by pid {}", path.display(), pid),
                    None => path.display().to_string(),
                };
                Err(PollError::CycleInProgress(detail))
            }
            Err(e) => Err(PollError::CycleInProgress(format!(
                "{} ({})",
                path.display(),
                e
            ))),
        }
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            logging::warn(
                DataSource::System,
                None,
                &format!("failed to remove lock file {}: {}", self.path.display(), e),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle execution
// ---------------------------------------------------------------------------

/// Runs one complete poll cycle.
///
/// `scraped_at` identifies the cycle and stamps every snapshot it produces.
/// With `run_aggregation` set (end-of-day flag or explicit request), the
/// cycle finishes by recomputing the full day's aggregates for the cycle's
/// local date — an idempotent overwrite.
///
/// A failed cycle logs which phase it died in before the error propagates.
pub fn run_cycle(
    db_client: &mut Client,
    http: &reqwest::blocking::Client,
    config: &Config,
    scraped_at: DateTime<Utc>,
    run_aggregation: bool,
) -> Result<CycleReport, PollError> {
    let mut state = CycleState::Fetching;
    let result = execute_cycle(db_client, http, config, scraped_at, run_aggregation, &mut state);
    if let Err(ref e) = result {
        logging::error(DataSource::System, None, &describe_failure(state, e));
    }
    result
}

fn describe_failure(state: CycleState, err: &PollError) -> String {
    format!("cycle {} during {}: {}", CycleState::Failed, state, err)
}

fn execute_cycle(
    db_client: &mut Client,
    http: &reqwest::blocking::Client,
    config: &Config,
    scraped_at: DateTime<Utc>,
    run_aggregation: bool,
    state: &mut CycleState,
) -> Result<CycleReport, PollError> {
    // FETCHING — abandon the cycle on any network/HTTP failure; nothing has
    // been written yet. Failures are classified (expected provider blips vs.
    // likely API changes) before they propagate.
    *state = CycleState::Fetching;
    let items = match wilson::fetch_vacancies(http, &config.api.base_url) {
        Ok(items) => items,
        Err(e) => {
            logging::log_api_failure("availability fetch", &e);
            return Err(e);
        }
    };
    let scraped = items.len();
    logging::info(
        DataSource::Api,
        None,
        &format!("fetched {} availability items", scraped),
    );

    // NORMALIZING — per-item failures are logged and skipped inside map_items.
    *state = CycleState::Normalizing;
    let (snapshots, mut skipped) = mapper::map_items(&items, scraped_at, &config.caps);

    // STORING — one transaction: either the store phase completes fully or
    // the cycle fails with nothing written.
    *state = CycleState::Storing;
    let mut stored = 0;
    {
        let mut txn = db_client.transaction()?;

        for snapshot in &snapshots {
            match db::append_snapshot(&mut txn, snapshot) {
                Ok(true) => {
                    stored += 1;
                    db::update_carpark_capacity(
                        &mut txn,
                        &snapshot.carpark_id,
                        snapshot.guest.total,
                        snapshot.monthly.total,
                    )?;
                }
                Ok(false) => {
                    // Duplicate (carpark_id, scraped_at) — a replayed cycle.
                    skipped += 1;
                    logging::debug(
                        DataSource::Database,
                        Some(&snapshot.carpark_id),
                        "duplicate snapshot skipped",
                    );
                }
                Err(PollError::UnknownCarpark(id)) => {
                    skipped += 1;
                    logging::warn(
                        DataSource::Database,
                        Some(&id),
                        "no metadata row; skipping snapshot (run refresh-metadata)",
                    );
                }
                Err(e) => return Err(e),
            }
        }

        txn.commit()?;
    }

    // A zero-stored cycle still completes as DONE, but always warns: an
    // empty fetch is as much a degradation signal as all-skipped storing.
    if stored == 0 {
        logging::warn(
            DataSource::System,
            None,
            &format!("cycle stored zero records ({} fetched)", scraped),
        );
    }

    // AGGREGATING — only on request; a deterministic overwrite of the day.
    let mut aggregates_written = 0;
    if run_aggregation {
        *state = CycleState::Aggregating;
        let date = aggregate::local_date(scraped_at, config.aggregation.utc_offset_hours)?;
        aggregates_written =
            aggregate::compute_and_store_all(db_client, date, config.aggregation.utc_offset_hours)?;
        logging::info(
            DataSource::Database,
            None,
            &format!("wrote {} aggregate rows for {}", aggregates_written, date),
        );
    }

    logging::log_cycle_summary(scraped, stored, skipped);

    *state = CycleState::Done;
    Ok(CycleReport {
        scraped_at,
        state: CycleState::Done,
        scraped,
        stored,
        skipped,
        aggregates_written,
    })
}

/// Runs the infrequent metadata refresh: fetch carpark attributes and upsert
/// them. Malformed records are skipped; returns (stored, skipped).
pub fn run_metadata_refresh(
    db_client: &mut Client,
    http: &reqwest::blocking::Client,
    config: &Config,
) -> Result<(usize, usize), PollError> {
    let infos = match wilson::fetch_carparks(http, &config.api.base_url) {
        Ok(infos) => infos,
        Err(e) => {
            logging::log_api_failure("metadata fetch", &e);
            return Err(e);
        }
    };
    let total = infos.len();

    let mut stored = 0;
    let mut skipped = 0;
    for info in infos {
        match info.into_carpark() {
            Ok(carpark) => {
                db::upsert_carpark(db_client, &carpark)?;
                stored += 1;
            }
            Err(e) => {
                skipped += 1;
                logging::warn(DataSource::Api, None, &format!("skipping metadata record: {}", e));
            }
        }
    }

    logging::info(
        DataSource::Database,
        None,
        &format!("metadata refresh: {}/{} carparks upserted", stored, total),
    );
    Ok((stored, skipped))
}

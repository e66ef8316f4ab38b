/// Maps raw API availability items into flat snapshot records.
///
/// One `VacancyItem` becomes one `AvailabilitySnapshot`. The guest and
/// monthly sub-structures may be missing, empty, or carry extra entries —
/// the first entry is taken defensively, never assumed. `scraped_at` is
/// threaded in from the orchestrator; nothing here reads the clock.

use chrono::{DateTime, Utc};

use crate::config::CapConfig;
use crate::ingest::wilson::VacancyItem;
use crate::logging::{self, DataSource};
use crate::model::{AvailabilitySnapshot, PollError};
use crate::normalize::{normalize, normalize_monthly};

/// Maps one API item into one snapshot.
///
/// Fails with `MalformedRecord` when the item carries no carpark id — that
/// single record is dropped by the caller, not the whole cycle.
pub fn map_item(
    item: &VacancyItem,
    scraped_at: DateTime<Utc>,
    caps: &CapConfig,
) -> Result<AvailabilitySnapshot, PollError> {
    let carpark_id = match &item.carpark_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => {
            return Err(PollError::MalformedRecord(
                "availability item missing carpark_id".to_string(),
            ));
        }
    };

    // First entry of each sub-array, defensively; absent or empty arrays
    // normalize the same way as explicit nulls.
    let raw_guest = item.guest.first();
    let raw_monthly = item.monthly.first();

    let mut guest = normalize(raw_guest.and_then(|g| g.available), caps.guest)?;
    guest.total = raw_guest.and_then(|g| g.total);

    // An exact reading can never exceed a known total; a capped reading can,
    // since the cap is a floor indicator, not a count.
    if !guest.is_capped {
        if let (Some(actual), Some(total)) = (guest.actual, guest.total) {
            if actual > total {
                guest.actual = Some(total);
                guest.display = total.to_string();
            }
        }
    }

    let mut monthly = normalize_monthly(
        raw_monthly.and_then(|m| m.available),
        raw_monthly.and_then(|m| m.is_full),
    );
    monthly.total = raw_monthly.and_then(|m| m.total);

    let total_available = match (guest.actual, monthly.available) {
        (Some(g), Some(m)) => Some(g + m),
        _ => None,
    };
    let total_capacity = match (guest.total, monthly.total) {
        (Some(g), Some(m)) => Some(g + m),
        _ => None,
    };

    Ok(AvailabilitySnapshot {
        carpark_id,
        scraped_at,
        source_last_update: item.last_update.clone(),
        guest,
        monthly,
        total_available,
        total_capacity,
    })
}

/// Maps a whole cycle's items, skipping malformed records.
///
/// Returns the mapped snapshots and the number of items skipped. Per-item
/// failures are logged and recovered here; they never abort the cycle.
pub fn map_items(
    items: &[VacancyItem],
    scraped_at: DateTime<Utc>,
    caps: &CapConfig,
) -> (Vec<AvailabilitySnapshot>, usize) {
    let mut snapshots = Vec::with_capacity(items.len());
    let mut skipped = 0;

    for item in items {
        match map_item(item, scraped_at, caps) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                logging::warn(
                    DataSource::Api,
                    item.carpark_id.as_deref(),
                    &format!("skipping item: {}", e),
                );
                skipped += 1;
            }
        }
    }

    (snapshots, skipped)
}

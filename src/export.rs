/// CSV export of stored snapshots.
///
/// Rows are flat denormalized records — one line per snapshot, joined with
/// the carpark's display name so the file is readable without the database.
/// Capped readings export their display form ("10+") alongside the numeric
/// floor, so the capping distinction survives the export.

use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use postgres::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;

use crate::db;
use crate::logging::{self, DataSource};
use crate::model::{AvailabilitySnapshot, PollError};

#[derive(Debug, Serialize)]
pub struct ExportRow {
    pub scraped_at: String,
    pub carpark_id: String,
    pub carpark_name: String,
    pub guest_available: Option<i64>,
    pub guest_display: String,
    pub guest_capped: bool,
    pub guest_total: Option<i64>,
    pub monthly_available: Option<i64>,
    pub monthly_full: bool,
    pub monthly_total: Option<i64>,
    pub total_available: Option<i64>,
    pub total_capacity: Option<i64>,
    pub source_last_update: Option<String>,
}

impl ExportRow {
    fn from_snapshot(snapshot: &AvailabilitySnapshot, names: &HashMap<String, String>) -> Self {
        ExportRow {
            scraped_at: snapshot.scraped_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            carpark_id: snapshot.carpark_id.clone(),
            carpark_name: names
                .get(&snapshot.carpark_id)
                .cloned()
                .unwrap_or_default(),
            guest_available: snapshot.guest.actual,
            guest_display: snapshot.guest.display.clone(),
            guest_capped: snapshot.guest.is_capped,
            guest_total: snapshot.guest.total,
            monthly_available: snapshot.monthly.available,
            monthly_full: snapshot.monthly.is_full,
            monthly_total: snapshot.monthly.total,
            total_available: snapshot.total_available,
            total_capacity: snapshot.total_capacity,
            source_last_update: snapshot.source_last_update.clone(),
        }
    }
}

/// Writes every snapshot in `[from, to)` to `output` as CSV, oldest first.
/// Returns the number of data rows written.
pub fn export_csv(
    client: &mut Client,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    output: &str,
) -> Result<usize, PollError> {
    let snapshots = db::snapshots_between(client, from, to)?;
    let names = db::carpark_names(client)?;

    let file = File::create(output)
        .map_err(|e| PollError::StoreUnavailable(format!("cannot create {}: {}", output, e)))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

    for snapshot in &snapshots {
        writer
            .serialize(ExportRow::from_snapshot(snapshot, &names))
            .map_err(|e| PollError::StoreUnavailable(format!("csv write failed: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| PollError::StoreUnavailable(format!("csv flush failed: {}", e)))?;

    logging::info(
        DataSource::System,
        None,
        &format!("exported {} rows to {}", snapshots.len(), output),
    );
    Ok(snapshots.len())
}

/// PostgreSQL snapshot store.
///
/// Owns the three tables and every statement that touches them:
///   - `carparks`               — metadata, insert-or-update keyed by id
///   - `availability_snapshots` — append-only time series,
///                                UNIQUE (carpark_id, scraped_at)
///   - `hourly_aggregates`      — derived stats, overwritten wholesale
///
/// Duplicate policy: at-least-once scheduling may replay a cycle, so
/// `append_snapshot` inserts with ON CONFLICT DO NOTHING and reports whether
/// a row actually landed. Analysis never needs to dedup.
///
/// Referential integrity is enforced: a snapshot for a carpark with no
/// metadata row fails with `UnknownCarpark` — metadata must be seeded by the
/// refresh path first. No placeholder rows are auto-created; a placeholder
/// would silently mask a missing metadata refresh.

use chrono::{DateTime, Utc};
use postgres::{Client, GenericClient, NoTls};
use std::collections::HashMap;

use crate::model::{AvailabilitySnapshot, AvailabilityReading, Carpark, HourlyAggregate, MonthlyReading, PollError};

const SNAPSHOT_COLUMNS: &str = "carpark_id, scraped_at, source_last_update, \
     guest_available, guest_available_display, guest_is_capped, guest_total, \
     monthly_available, monthly_is_full, monthly_total, \
     total_available, total_capacity";

/// Connects to the database named by `DATABASE_URL`.
pub fn connect(database_url: &str) -> Result<Client, PollError> {
    Client::connect(database_url, NoTls)
        .map_err(|e| PollError::StoreUnavailable(format!("failed to connect: {}", e)))
}

/// Creates the schema idempotently. Safe to run at every startup.
pub fn ensure_schema(client: &mut Client) -> Result<(), PollError> {
    client.batch_execute(
        "
        CREATE TABLE IF NOT EXISTS carparks (
            id              TEXT PRIMARY KEY,
            name_en         TEXT,
            name_zh         TEXT,
            address_en      TEXT,
            address_zh      TEXT,
            district        TEXT,
            latitude        DOUBLE PRECISION,
            longitude       DOUBLE PRECISION,
            guest_total     BIGINT,
            monthly_total   BIGINT,
            has_ev_charging BOOLEAN NOT NULL DEFAULT FALSE,
            updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS availability_snapshots (
            id                      BIGSERIAL PRIMARY KEY,
            carpark_id              TEXT NOT NULL REFERENCES carparks(id),
            scraped_at              TIMESTAMPTZ NOT NULL,
            source_last_update      TEXT,
            guest_available         BIGINT,
            guest_available_display TEXT NOT NULL,
            guest_is_capped         BOOLEAN NOT NULL,
            guest_total             BIGINT,
            monthly_available       BIGINT,
            monthly_is_full         BOOLEAN NOT NULL,
            monthly_total           BIGINT,
            total_available         BIGINT,
            total_capacity          BIGINT,
            UNIQUE (carpark_id, scraped_at)
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_scraped_at
            ON availability_snapshots (scraped_at);

        CREATE TABLE IF NOT EXISTS hourly_aggregates (
            carpark_id           TEXT NOT NULL REFERENCES carparks(id),
            date                 DATE NOT NULL,
            hour                 INT NOT NULL,
            min_guest_available  BIGINT,
            max_guest_available  BIGINT,
            avg_guest_available  DOUBLE PRECISION,
            samples_at_capacity  BIGINT NOT NULL,
            total_samples        BIGINT NOT NULL,
            avg_utilization_pct  DOUBLE PRECISION,
            peak_utilization_pct DOUBLE PRECISION,
            PRIMARY KEY (carpark_id, date, hour)
        );
        ",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Carpark metadata
// ---------------------------------------------------------------------------

/// Insert-or-update keyed by id. Idempotent; rerunning a metadata refresh
/// with unchanged data is a no-op apart from `updated_at`.
pub fn upsert_carpark(client: &mut impl GenericClient, carpark: &Carpark) -> Result<(), PollError> {
    client.execute(
        "INSERT INTO carparks
            (id, name_en, name_zh, address_en, address_zh, district,
             latitude, longitude, guest_total, monthly_total, has_ev_charging,
             updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
         ON CONFLICT (id) DO UPDATE SET
            name_en = EXCLUDED.name_en,
            name_zh = EXCLUDED.name_zh,
            address_en = EXCLUDED.address_en,
            address_zh = EXCLUDED.address_zh,
            district = EXCLUDED.district,
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude,
            guest_total = EXCLUDED.guest_total,
            monthly_total = EXCLUDED.monthly_total,
            has_ev_charging = EXCLUDED.has_ev_charging,
            updated_at = now()",
        &[
            &carpark.id,
            &carpark.name_en,
            &carpark.name_zh,
            &carpark.address_en,
            &carpark.address_zh,
            &carpark.district,
            &carpark.latitude,
            &carpark.longitude,
            &carpark.guest_total,
            &carpark.monthly_total,
            &carpark.has_ev_charging,
        ],
    )?;
    Ok(())
}

/// Folds capacity totals observed in an availability payload back onto the
/// carpark row, keeping existing values when the payload omits them.
pub fn update_carpark_capacity(
    client: &mut impl GenericClient,
    carpark_id: &str,
    guest_total: Option<i64>,
    monthly_total: Option<i64>,
) -> Result<(), PollError> {
    if guest_total.is_none() && monthly_total.is_none() {
        return Ok(());
    }
    client.execute(
        "UPDATE carparks SET
            guest_total = COALESCE($2, guest_total),
            monthly_total = COALESCE($3, monthly_total),
            updated_at = now()
         WHERE id = $1",
        &[&carpark_id, &guest_total, &monthly_total],
    )?;
    Ok(())
}

pub fn carpark_exists(client: &mut impl GenericClient, carpark_id: &str) -> Result<bool, PollError> {
    let row = client.query_one(
        "SELECT EXISTS (SELECT 1 FROM carparks WHERE id = $1)",
        &[&carpark_id],
    )?;
    Ok(row.get(0))
}

/// All carpark ids, ordered for deterministic iteration.
pub fn all_carpark_ids(client: &mut impl GenericClient) -> Result<Vec<String>, PollError> {
    let rows = client.query("SELECT id FROM carparks ORDER BY id", &[])?;
    Ok(rows.iter().map(|r| r.get(0)).collect())
}

/// id → english name map, used by the export projection.
pub fn carpark_names(client: &mut impl GenericClient) -> Result<HashMap<String, String>, PollError> {
    let rows = client.query("SELECT id, COALESCE(name_en, '') FROM carparks", &[])?;
    Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Appends one snapshot. Returns `true` if a row was inserted, `false` if an
/// identical `(carpark_id, scraped_at)` key already existed (duplicate cycle,
/// silently skipped). Fails with `UnknownCarpark` when the metadata row is
/// missing.
pub fn append_snapshot(
    client: &mut impl GenericClient,
    snapshot: &AvailabilitySnapshot,
) -> Result<bool, PollError> {
    if !carpark_exists(client, &snapshot.carpark_id)? {
        return Err(PollError::UnknownCarpark(snapshot.carpark_id.clone()));
    }

    let inserted = client.execute(
        "INSERT INTO availability_snapshots
            (carpark_id, scraped_at, source_last_update,
             guest_available, guest_available_display, guest_is_capped, guest_total,
             monthly_available, monthly_is_full, monthly_total,
             total_available, total_capacity)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (carpark_id, scraped_at) DO NOTHING",
        &[
            &snapshot.carpark_id,
            &snapshot.scraped_at,
            &snapshot.source_last_update,
            &snapshot.guest.actual,
            &snapshot.guest.display,
            &snapshot.guest.is_capped,
            &snapshot.guest.total,
            &snapshot.monthly.available,
            &snapshot.monthly.is_full,
            &snapshot.monthly.total,
            &snapshot.total_available,
            &snapshot.total_capacity,
        ],
    )?;

    Ok(inserted == 1)
}

/// Most recent snapshot for a carpark, or `None` if it has never been polled.
pub fn latest_snapshot(
    client: &mut impl GenericClient,
    carpark_id: &str,
) -> Result<Option<AvailabilitySnapshot>, PollError> {
    let query = format!(
        "SELECT {} FROM availability_snapshots
         WHERE carpark_id = $1
         ORDER BY scraped_at DESC
         LIMIT 1",
        SNAPSHOT_COLUMNS
    );
    let row = client.query_opt(&query, &[&carpark_id])?;
    Ok(row.map(|r| row_to_snapshot(&r)))
}

/// Snapshots for one carpark in `[from, to)`, ordered by `scraped_at`.
pub fn snapshots_in_range(
    client: &mut impl GenericClient,
    carpark_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<AvailabilitySnapshot>, PollError> {
    let query = format!(
        "SELECT {} FROM availability_snapshots
         WHERE carpark_id = $1 AND scraped_at >= $2 AND scraped_at < $3
         ORDER BY scraped_at",
        SNAPSHOT_COLUMNS
    );
    let rows = client.query(&query, &[&carpark_id, &from, &to])?;
    Ok(rows.iter().map(row_to_snapshot).collect())
}

/// Snapshots for all carparks in `[from, to)`, ordered by time then carpark.
/// The export dump is a thin projection over this query.
pub fn snapshots_between(
    client: &mut impl GenericClient,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<AvailabilitySnapshot>, PollError> {
    let query = format!(
        "SELECT {} FROM availability_snapshots
         WHERE scraped_at >= $1 AND scraped_at < $2
         ORDER BY scraped_at, carpark_id",
        SNAPSHOT_COLUMNS
    );
    let rows = client.query(&query, &[&from, &to])?;
    Ok(rows.iter().map(row_to_snapshot).collect())
}

fn row_to_snapshot(row: &postgres::Row) -> AvailabilitySnapshot {
    AvailabilitySnapshot {
        carpark_id: row.get(0),
        scraped_at: row.get(1),
        source_last_update: row.get(2),
        guest: AvailabilityReading {
            actual: row.get(3),
            display: row.get(4),
            is_capped: row.get(5),
            total: row.get(6),
        },
        monthly: MonthlyReading {
            available: row.get(7),
            is_full: row.get(8),
            total: row.get(9),
        },
        total_available: row.get(10),
        total_capacity: row.get(11),
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Overwrites the aggregate row for its `(carpark_id, date, hour)` key.
/// Recomputation replaces the whole row; nothing is incrementally patched.
pub fn upsert_hourly_aggregate(
    client: &mut impl GenericClient,
    aggregate: &HourlyAggregate,
) -> Result<(), PollError> {
    client.execute(
        "INSERT INTO hourly_aggregates
            (carpark_id, date, hour,
             min_guest_available, max_guest_available, avg_guest_available,
             samples_at_capacity, total_samples,
             avg_utilization_pct, peak_utilization_pct)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (carpark_id, date, hour) DO UPDATE SET
            min_guest_available = EXCLUDED.min_guest_available,
            max_guest_available = EXCLUDED.max_guest_available,
            avg_guest_available = EXCLUDED.avg_guest_available,
            samples_at_capacity = EXCLUDED.samples_at_capacity,
            total_samples = EXCLUDED.total_samples,
            avg_utilization_pct = EXCLUDED.avg_utilization_pct,
            peak_utilization_pct = EXCLUDED.peak_utilization_pct",
        &[
            &aggregate.carpark_id,
            &aggregate.date,
            &aggregate.hour,
            &aggregate.min_guest_available,
            &aggregate.max_guest_available,
            &aggregate.avg_guest_available,
            &aggregate.samples_at_capacity,
            &aggregate.total_samples,
            &aggregate.avg_utilization_pct,
            &aggregate.peak_utilization_pct,
        ],
    )?;
    Ok(())
}

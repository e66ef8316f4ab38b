/// Hourly aggregate derivation.
///
/// The statistics core is a pure function of a snapshot window, so a
/// recompute over unchanged snapshots is bit-identical — aggregates are
/// always overwritten wholesale, never incrementally patched.
///
/// Capped samples need care: a "10+" reading says availability is at least
/// the cap, so true utilization is unknown. Capped samples therefore count
/// toward `samples_at_capacity` and the min/max/avg of the reported value,
/// but are excluded from all utilization math.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use postgres::Client;

use crate::db;
use crate::model::{AvailabilitySnapshot, HourlyAggregate, PollError};

// ---------------------------------------------------------------------------
// Pure statistics core
// ---------------------------------------------------------------------------

/// Derives the hourly aggregate for one carpark from its snapshot window.
///
/// Returns `None` for an empty window — no row is stored for hours without
/// samples. Utilization fields are `None` (never zero) when no non-capped
/// sample with a positive total exists.
pub fn hourly_stats(
    carpark_id: &str,
    date: NaiveDate,
    hour: i32,
    samples: &[AvailabilitySnapshot],
) -> Option<HourlyAggregate> {
    if samples.is_empty() {
        return None;
    }

    // Samples with a meaningful (exact or capped) guest value.
    let known: Vec<i64> = samples.iter().filter_map(|s| s.guest.actual).collect();

    let min_guest_available = known.iter().copied().min();
    let max_guest_available = known.iter().copied().max();
    let avg_guest_available = if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<i64>() as f64 / known.len() as f64)
    };

    let samples_at_capacity = samples.iter().filter(|s| s.guest.is_capped).count() as i64;

    // Per-sample utilization, non-capped samples with a positive total only.
    let utilizations: Vec<f64> = samples
        .iter()
        .filter(|s| !s.guest.is_capped)
        .filter_map(|s| match (s.guest.actual, s.guest.total) {
            (Some(available), Some(total)) if total > 0 => {
                Some((total - available) as f64 * 100.0 / total as f64)
            }
            _ => None,
        })
        .collect();

    let avg_utilization_pct = if utilizations.is_empty() {
        None
    } else {
        Some(utilizations.iter().sum::<f64>() / utilizations.len() as f64)
    };
    let peak_utilization_pct = utilizations.iter().copied().reduce(f64::max);

    Some(HourlyAggregate {
        carpark_id: carpark_id.to_string(),
        date,
        hour,
        min_guest_available,
        max_guest_available,
        avg_guest_available,
        samples_at_capacity,
        total_samples: samples.len() as i64,
        avg_utilization_pct,
        peak_utilization_pct,
    })
}

/// UTC bounds of one local `(date, hour)` bucket. Snapshots are stored in
/// UTC; aggregation buckets them by the provider's local clock.
pub fn window_bounds(
    date: NaiveDate,
    hour: i32,
    utc_offset_hours: i32,
) -> Result<(DateTime<Utc>, DateTime<Utc>), PollError> {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
        PollError::InvalidConfiguration(format!(
            "utc_offset_hours out of range: {}",
            utc_offset_hours
        ))
    })?;
    let naive = date
        .and_hms_opt(hour as u32, 0, 0)
        .ok_or_else(|| PollError::InvalidConfiguration(format!("invalid hour: {}", hour)))?;
    let start = naive
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| {
            PollError::InvalidConfiguration(format!("unrepresentable window: {} {}", date, hour))
        })?
        .with_timezone(&Utc);
    Ok((start, start + Duration::hours(1)))
}

/// The provider-local calendar date of a UTC instant. Aggregation and daily
/// bucketing run on the provider's clock, not UTC.
pub fn local_date(at: DateTime<Utc>, utc_offset_hours: i32) -> Result<NaiveDate, PollError> {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
        PollError::InvalidConfiguration(format!(
            "utc_offset_hours out of range: {}",
            utc_offset_hours
        ))
    })?;
    Ok(at.with_timezone(&offset).date_naive())
}

// ---------------------------------------------------------------------------
// Store-backed operations
// ---------------------------------------------------------------------------

/// Computes the aggregate for one carpark-hour from stored snapshots.
pub fn compute_hourly(
    client: &mut Client,
    carpark_id: &str,
    date: NaiveDate,
    hour: i32,
    utc_offset_hours: i32,
) -> Result<Option<HourlyAggregate>, PollError> {
    let (from, to) = window_bounds(date, hour, utc_offset_hours)?;
    let samples = db::snapshots_in_range(client, carpark_id, from, to)?;
    Ok(hourly_stats(carpark_id, date, hour, &samples))
}

/// Recomputes and upserts aggregates for all carparks × 24 hours of a date.
/// Returns the number of rows written. Idempotent by construction.
pub fn compute_and_store_all(
    client: &mut Client,
    date: NaiveDate,
    utc_offset_hours: i32,
) -> Result<usize, PollError> {
    let carpark_ids = db::all_carpark_ids(client)?;
    let mut written = 0;

    for carpark_id in &carpark_ids {
        for hour in 0..24 {
            if let Some(aggregate) =
                compute_hourly(client, carpark_id, date, hour, utc_offset_hours)?
            {
                db::upsert_hourly_aggregate(client, &aggregate)?;
                written += 1;
            }
        }
    }

    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AvailabilityReading, MonthlyReading};
    use chrono::TimeZone;

    fn sample(actual: Option<i64>, is_capped: bool, total: Option<i64>) -> AvailabilitySnapshot {
        AvailabilitySnapshot {
            carpark_id: "W001".to_string(),
            scraped_at: Utc.with_ymd_and_hms(2026, 8, 29, 1, 0, 0).unwrap(),
            source_last_update: None,
            guest: AvailabilityReading {
                actual,
                display: match (actual, is_capped) {
                    (Some(v), true) => format!("{}+", v),
                    (Some(v), false) => v.to_string(),
                    (None, _) => "unknown".to_string(),
                },
                is_capped,
                total,
            },
            monthly: MonthlyReading {
                available: None,
                is_full: false,
                total: None,
            },
            total_available: None,
            total_capacity: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()
    }

    // --- Basic stats --------------------------------------------------------

    #[test]
    fn test_min_max_avg_over_known_values() {
        let samples = vec![
            sample(Some(2), false, Some(100)),
            sample(Some(4), false, Some(100)),
            sample(Some(6), false, Some(100)),
        ];
        let agg = hourly_stats("W001", date(), 9, &samples).expect("non-empty window");
        assert_eq!(agg.min_guest_available, Some(2));
        assert_eq!(agg.max_guest_available, Some(6));
        assert_eq!(agg.avg_guest_available, Some(4.0));
        assert_eq!(agg.total_samples, 3);
        assert_eq!(agg.samples_at_capacity, 0);
    }

    #[test]
    fn test_empty_window_yields_no_aggregate() {
        assert!(hourly_stats("W001", date(), 3, &[]).is_none());
    }

    #[test]
    fn test_unknown_readings_counted_but_excluded_from_stats() {
        let samples = vec![sample(None, false, None), sample(Some(5), false, Some(50))];
        let agg = hourly_stats("W001", date(), 9, &samples).unwrap();
        assert_eq!(agg.total_samples, 2);
        assert_eq!(agg.min_guest_available, Some(5));
        assert_eq!(agg.avg_guest_available, Some(5.0));
    }

    #[test]
    fn test_all_unknown_readings_yield_null_stats() {
        let samples = vec![sample(None, false, None), sample(None, false, None)];
        let agg = hourly_stats("W001", date(), 9, &samples).unwrap();
        assert_eq!(agg.total_samples, 2);
        assert!(agg.min_guest_available.is_none());
        assert!(agg.avg_guest_available.is_none());
        assert!(agg.avg_utilization_pct.is_none());
    }

    // --- Capped-sample policy -----------------------------------------------

    #[test]
    fn test_capped_samples_count_toward_capacity_and_value_stats() {
        let samples = vec![
            sample(Some(10), true, Some(100)), // "10+"
            sample(Some(4), false, Some(100)),
        ];
        let agg = hourly_stats("W001", date(), 9, &samples).unwrap();
        assert_eq!(agg.samples_at_capacity, 1);
        // Capped value participates in min/max/avg of the reported reading.
        assert_eq!(agg.max_guest_available, Some(10));
        assert_eq!(agg.avg_guest_available, Some(7.0));
    }

    #[test]
    fn test_capped_samples_excluded_from_utilization() {
        // Scenario B: the capped sample must not drag utilization up or down.
        let samples = vec![
            sample(Some(10), true, Some(100)),
            sample(Some(50), false, Some(100)), // 50% utilized
        ];
        let agg = hourly_stats("W001", date(), 9, &samples).unwrap();
        assert_eq!(agg.avg_utilization_pct, Some(50.0));
        assert_eq!(agg.peak_utilization_pct, Some(50.0));
    }

    #[test]
    fn test_no_eligible_samples_yield_null_utilization_not_zero() {
        // Scenario F: an hour of nothing but capped readings.
        let samples = vec![
            sample(Some(10), true, Some(100)),
            sample(Some(10), true, Some(100)),
        ];
        let agg = hourly_stats("W001", date(), 9, &samples).unwrap();
        assert_eq!(agg.samples_at_capacity, 2);
        assert!(
            agg.avg_utilization_pct.is_none(),
            "utilization must be null, not zero, with no eligible samples"
        );
        assert!(agg.peak_utilization_pct.is_none());
    }

    #[test]
    fn test_zero_total_excluded_from_utilization() {
        let samples = vec![sample(Some(0), false, Some(0)), sample(Some(1), false, Some(4))];
        let agg = hourly_stats("W001", date(), 9, &samples).unwrap();
        // Only the total=4 sample is eligible: (4-1)*100/4 = 75%.
        assert_eq!(agg.avg_utilization_pct, Some(75.0));
    }

    #[test]
    fn test_utilization_formula_and_peak() {
        let samples = vec![
            sample(Some(20), false, Some(100)), // 80%
            sample(Some(40), false, Some(100)), // 60%
        ];
        let agg = hourly_stats("W001", date(), 9, &samples).unwrap();
        assert_eq!(agg.avg_utilization_pct, Some(70.0));
        assert_eq!(agg.peak_utilization_pct, Some(80.0));
    }

    // --- Determinism --------------------------------------------------------

    #[test]
    fn test_recompute_over_same_window_is_bit_identical() {
        let samples = vec![
            sample(Some(3), false, Some(130)),
            sample(Some(10), true, Some(130)),
            sample(None, false, None),
            sample(Some(7), false, Some(90)),
        ];
        let first = hourly_stats("W001", date(), 14, &samples).unwrap();
        let second = hourly_stats("W001", date(), 14, &samples).unwrap();
        assert_eq!(first, second, "aggregate must be a pure function of its window");
    }

    // --- Window bounds ------------------------------------------------------

    #[test]
    fn test_window_bounds_convert_local_hour_to_utc() {
        // Local 2026-08-29 09:00 at UTC+8 is 2026-08-29 01:00 UTC.
        let (from, to) = window_bounds(date(), 9, 8).expect("valid window");
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 8, 29, 1, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2026, 8, 29, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_window_bounds_utc_offset_zero() {
        let (from, to) = window_bounds(date(), 0, 0).expect("valid window");
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 8, 29, 0, 0, 0).unwrap());
        assert_eq!((to - from), Duration::hours(1));
    }

    #[test]
    fn test_window_bounds_reject_invalid_hour() {
        assert!(window_bounds(date(), 24, 8).is_err());
    }

    // --- Local date bucketing -----------------------------------------------

    #[test]
    fn test_local_date_rolls_over_at_offset_midnight() {
        // 2026-08-28 18:00 UTC is already 2026-08-29 02:00 at UTC+8.
        let at = Utc.with_ymd_and_hms(2026, 8, 28, 18, 0, 0).unwrap();
        assert_eq!(local_date(at, 8).unwrap(), date());
        assert_eq!(
            local_date(at, 0).unwrap(),
            NaiveDate::from_ymd_opt(2026, 8, 28).unwrap()
        );
    }

    #[test]
    fn test_local_date_rejects_bad_offset() {
        let at = Utc.with_ymd_and_hms(2026, 8, 29, 0, 0, 0).unwrap();
        assert!(local_date(at, 99).is_err());
    }
}

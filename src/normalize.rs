/// Truncated-value normalization.
///
/// The provider clamps guest availability to a cap (observed cap = 10) once
/// the true value meets or exceeds it, replacing exactness with a floor
/// indicator ("10+"). The cap is observed API behavior, not documented by the
/// provider, so it arrives here as an explicit configuration value rather
/// than a literal — the provider could change it.
///
/// All functions are pure: no clock reads, no I/O, no ambient state.

use crate::model::{AvailabilityReading, MonthlyReading, PollError};

/// Normalizes a raw guest availability count against a cap threshold.
///
/// - `None` → `actual = None`, `display = "unknown"`, not capped.
/// - `raw >= cap_threshold` → `actual = cap_threshold`, `display = "{cap}+"`,
///   capped.
/// - otherwise → the exact value and its decimal string.
///
/// Negative raw values are clamped to 0 — `actual` is never negative.
/// `cap_threshold <= 0` is a configuration error, caught at startup.
pub fn normalize(
    raw_value: Option<i64>,
    cap_threshold: i64,
) -> Result<AvailabilityReading, PollError> {
    if cap_threshold <= 0 {
        return Err(PollError::InvalidConfiguration(format!(
            "cap threshold must be positive, got {}",
            cap_threshold
        )));
    }

    let reading = match raw_value {
        None => AvailabilityReading {
            actual: None,
            display: "unknown".to_string(),
            is_capped: false,
            total: None,
        },
        Some(raw) => {
            let raw = raw.max(0);
            if raw >= cap_threshold {
                AvailabilityReading {
                    actual: Some(cap_threshold),
                    display: format!("{}+", cap_threshold),
                    is_capped: true,
                    total: None,
                }
            } else {
                AvailabilityReading {
                    actual: Some(raw),
                    display: raw.to_string(),
                    is_capped: false,
                    total: None,
                }
            }
        }
    };

    Ok(reading)
}

/// Normalizes a monthly-bay reading.
///
/// Monthly bays carry no numeric cap; the provider signals exhaustion with a
/// boolean full flag instead. A signaled full flag forces `available = 0`
/// regardless of any numeric field present.
pub fn normalize_monthly(raw_value: Option<i64>, is_full: Option<bool>) -> MonthlyReading {
    let is_full = is_full.unwrap_or(false);
    let available = if is_full {
        Some(0)
    } else {
        raw_value.map(|v| v.max(0))
    };

    MonthlyReading {
        available,
        is_full,
        total: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: i64 = 10;

    // --- Exact values -------------------------------------------------------

    #[test]
    fn test_values_below_cap_pass_through_exactly() {
        for raw in 0..CAP {
            let reading = normalize(Some(raw), CAP).expect("valid cap should not error");
            assert_eq!(reading.actual, Some(raw));
            assert_eq!(reading.display, raw.to_string());
            assert!(
                !reading.is_capped,
                "value {} below cap {} must not be capped",
                raw, CAP
            );
        }
    }

    #[test]
    fn test_zero_is_exact_not_unknown() {
        let reading = normalize(Some(0), CAP).expect("valid cap should not error");
        assert_eq!(reading.actual, Some(0));
        assert_eq!(reading.display, "0");
        assert!(!reading.is_capped);
    }

    // --- Capped values ------------------------------------------------------

    #[test]
    fn test_values_at_or_above_cap_are_clamped() {
        for raw in [CAP, CAP + 1, CAP + 5, 999] {
            let reading = normalize(Some(raw), CAP).expect("valid cap should not error");
            assert_eq!(
                reading.actual,
                Some(CAP),
                "raw {} must clamp to the cap threshold",
                raw
            );
            assert_eq!(reading.display, "10+");
            assert!(reading.is_capped, "raw {} at/above cap must be capped", raw);
        }
    }

    #[test]
    fn test_cap_display_tracks_threshold() {
        // The cap is configuration, not a literal — a changed threshold must
        // flow through to the display string.
        let reading = normalize(Some(50), 25).expect("valid cap should not error");
        assert_eq!(reading.actual, Some(25));
        assert_eq!(reading.display, "25+");
        assert!(reading.is_capped);
    }

    // --- Absent values ------------------------------------------------------

    #[test]
    fn test_null_raw_value_never_errors() {
        let reading = normalize(None, CAP).expect("null raw value must not error");
        assert_eq!(reading.actual, None);
        assert_eq!(reading.display, "unknown");
        assert!(!reading.is_capped);
    }

    // --- Edge cases ---------------------------------------------------------

    #[test]
    fn test_negative_raw_value_clamps_to_zero() {
        // The provider should never send a negative count, but the invariant
        // "actual is never negative" is enforced here, not trusted upstream.
        let reading = normalize(Some(-3), CAP).expect("valid cap should not error");
        assert_eq!(reading.actual, Some(0));
        assert_eq!(reading.display, "0");
        assert!(!reading.is_capped);
    }

    #[test]
    fn test_zero_cap_threshold_is_invalid_configuration() {
        let result = normalize(Some(5), 0);
        assert!(
            matches!(result, Err(PollError::InvalidConfiguration(_))),
            "cap 0 must fail with InvalidConfiguration, got {:?}",
            result
        );
    }

    #[test]
    fn test_negative_cap_threshold_is_invalid_configuration() {
        let result = normalize(None, -10);
        assert!(matches!(result, Err(PollError::InvalidConfiguration(_))));
    }

    // --- Monthly ------------------------------------------------------------

    #[test]
    fn test_monthly_full_flag_forces_zero_available() {
        // Scenario C: a signaled full flag wins over any numeric field.
        let reading = normalize_monthly(Some(7), Some(true));
        assert_eq!(reading.available, Some(0));
        assert!(reading.is_full);
    }

    #[test]
    fn test_monthly_not_full_keeps_numeric_value() {
        let reading = normalize_monthly(Some(7), Some(false));
        assert_eq!(reading.available, Some(7));
        assert!(!reading.is_full);
    }

    #[test]
    fn test_monthly_absent_flag_defaults_to_not_full() {
        let reading = normalize_monthly(Some(3), None);
        assert_eq!(reading.available, Some(3));
        assert!(!reading.is_full);
    }

    #[test]
    fn test_monthly_absent_value_and_flag_is_unknown() {
        let reading = normalize_monthly(None, None);
        assert_eq!(reading.available, None);
        assert!(!reading.is_full);
    }
}

/// Wilson Parking mobile API client.
///
/// The API is a single POST endpoint taking an `{action, args}` JSON
/// envelope. Two actions matter here:
///   - `carpark:available-bays` — real-time per-carpark availability
///   - `carpark:query`          — static carpark metadata (infrequent refresh)
///
/// Response envelopes are not stable across provider releases: availability
/// items have been observed under `result.bays`, `result.data`, a top-level
/// `bays`, and a flat `results` array. Parsing tolerates all of them, and the
/// absence of any expected key yields an empty item list rather than an
/// error — only an unparseable body aborts the cycle.

use serde::Deserialize;

use crate::model::{Carpark, PollError};

const ACTION_AVAILABLE_BAYS: &str = "carpark:available-bays";
const ACTION_CARPARK_QUERY: &str = "carpark:query";
const USER_AGENT: &str = "parkmon/0.1";

// ============================================================================
// API Response Structures
// ============================================================================

/// One availability item as the API reports it.
///
/// The guest and monthly sub-structures arrive as arrays that may be missing,
/// empty, or carry extra entries; consumers must take the first entry
/// defensively and never assume shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VacancyItem {
    #[serde(default)]
    pub carpark_id: Option<String>,
    #[serde(default)]
    pub guest: Vec<RawGuestReading>,
    #[serde(default)]
    pub monthly: Vec<RawMonthlyReading>,
    /// The upstream system's own timestamp. May be absent, stale, or skewed;
    /// carried through as informational metadata only.
    #[serde(default)]
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGuestReading {
    #[serde(default)]
    pub available: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMonthlyReading {
    #[serde(default)]
    pub available: Option<i64>,
    #[serde(default)]
    pub is_full: Option<bool>,
    #[serde(default)]
    pub total: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VacancyEnvelope {
    #[serde(default)]
    result: Option<VacancyResult>,
    #[serde(default)]
    results: Option<Vec<VacancyItem>>,
    #[serde(default)]
    bays: Option<Vec<VacancyItem>>,
}

#[derive(Debug, Deserialize)]
struct VacancyResult {
    #[serde(default)]
    bays: Option<Vec<VacancyItem>>,
    #[serde(default)]
    data: Option<Vec<VacancyItem>>,
}

/// Localized string pair as the metadata endpoint reports names/addresses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Localized {
    #[serde(default)]
    pub en_us: Option<String>,
    #[serde(default)]
    pub zh_hant: Option<String>,
}

/// One carpark metadata record from `carpark:query`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarparkInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Localized,
    #[serde(default)]
    pub address: Localized,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub guest_total: Option<i64>,
    #[serde(default)]
    pub monthly_total: Option<i64>,
    #[serde(default)]
    pub ev_charging: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CarparkEnvelope {
    #[serde(default)]
    result: Option<CarparkResult>,
    #[serde(default)]
    results: Option<Vec<CarparkInfo>>,
}

#[derive(Debug, Deserialize)]
struct CarparkResult {
    #[serde(default)]
    carparks: Option<Vec<CarparkInfo>>,
}

impl CarparkInfo {
    /// Converts a raw metadata record into the domain entity.
    ///
    /// A record without an id cannot be joined to anything and fails as a
    /// `MalformedRecord` — that single record is dropped, not the refresh.
    pub fn into_carpark(self) -> Result<Carpark, PollError> {
        let id = match self.id {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(PollError::MalformedRecord(
                    "carpark metadata record missing id".to_string(),
                ));
            }
        };

        Ok(Carpark {
            id,
            name_en: self.name.en_us,
            name_zh: self.name.zh_hant,
            address_en: self.address.en_us,
            address_zh: self.address.zh_hant,
            district: self.district,
            latitude: self.latitude,
            longitude: self.longitude,
            guest_total: self.guest_total,
            monthly_total: self.monthly_total,
            has_ev_charging: self.ev_charging.unwrap_or(false),
        })
    }
}

// ============================================================================
// API Client Functions
// ============================================================================

/// Builds the blocking HTTP client with the configured per-request timeout.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, PollError> {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| PollError::FetchError(format!("failed to build HTTP client: {}", e)))
}

/// Performs one `{action, args}` call and returns the raw response body.
fn call_api(
    client: &reqwest::blocking::Client,
    base_url: &str,
    action: &str,
) -> Result<String, PollError> {
    let payload = serde_json::json!({
        "action": action,
        "args": { "request": {} },
    });

    let response = client
        .post(base_url)
        .header("Accept", "application/json")
        .json(&payload)
        .send()?;

    if !response.status().is_success() {
        return Err(PollError::FetchError(format!(
            "{} returned HTTP {}",
            action,
            response.status()
        )));
    }

    Ok(response.text()?)
}

/// Fetches the current availability items for all carparks.
pub fn fetch_vacancies(
    client: &reqwest::blocking::Client,
    base_url: &str,
) -> Result<Vec<VacancyItem>, PollError> {
    let body = call_api(client, base_url, ACTION_AVAILABLE_BAYS)?;
    parse_vacancy_response(&body)
}

/// Fetches static carpark metadata (the infrequent refresh path).
pub fn fetch_carparks(
    client: &reqwest::blocking::Client,
    base_url: &str,
) -> Result<Vec<CarparkInfo>, PollError> {
    let body = call_api(client, base_url, ACTION_CARPARK_QUERY)?;
    parse_carpark_response(&body)
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Parses an availability response body, trying each known envelope shape.
///
/// A body with none of the expected keys parses to an empty list; only a body
/// that is not valid JSON (or not an object) is a `FetchError`.
pub fn parse_vacancy_response(body: &str) -> Result<Vec<VacancyItem>, PollError> {
    let envelope: VacancyEnvelope = serde_json::from_str(body)
        .map_err(|e| PollError::FetchError(format!("unparseable availability body: {}", e)))?;

    let items = envelope
        .result
        .and_then(|r| r.bays.or(r.data))
        .or(envelope.bays)
        .or(envelope.results)
        .unwrap_or_default();

    Ok(items)
}

/// Parses a metadata response body (`result.carparks` or flat `results`).
pub fn parse_carpark_response(body: &str) -> Result<Vec<CarparkInfo>, PollError> {
    let envelope: CarparkEnvelope = serde_json::from_str(body)
        .map_err(|e| PollError::FetchError(format!("unparseable metadata body: {}", e)))?;

    let infos = envelope
        .result
        .and_then(|r| r.carparks)
        .or(envelope.results)
        .unwrap_or_default();

    Ok(infos)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_bays_envelope() {
        let body = r#"{
            "result": {
                "bays": [
                    {
                        "carpark_id": "W001",
                        "guest": [{"available": 3, "total": 130}],
                        "monthly": [{"available": 12, "is_full": false, "total": 40}],
                        "last_update": "2026-08-29T10:00:00+08:00"
                    }
                ]
            }
        }"#;
        let items = parse_vacancy_response(body).expect("envelope should parse");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].carpark_id.as_deref(), Some("W001"));
        assert_eq!(items[0].guest[0].available, Some(3));
        assert_eq!(items[0].monthly[0].total, Some(40));
    }

    #[test]
    fn test_parse_result_data_envelope() {
        let body = r#"{"result": {"data": [{"carpark_id": "W002"}]}}"#;
        let items = parse_vacancy_response(body).expect("data envelope should parse");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].carpark_id.as_deref(), Some("W002"));
    }

    #[test]
    fn test_parse_top_level_bays_envelope() {
        let body = r#"{"bays": [{"carpark_id": "W003"}]}"#;
        let items = parse_vacancy_response(body).expect("top-level bays should parse");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_parse_flat_results_envelope() {
        let body = r#"{"results": [{"carpark_id": "W004"}, {"carpark_id": "W005"}]}"#;
        let items = parse_vacancy_response(body).expect("results envelope should parse");
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_missing_expected_keys_yields_empty_not_error() {
        // Absence of expected keys must not crash the cycle.
        let items = parse_vacancy_response(r#"{"status": "ok"}"#)
            .expect("unexpected envelope should not error");
        assert!(items.is_empty());
    }

    #[test]
    fn test_unparseable_body_is_fetch_error() {
        let result = parse_vacancy_response("<html>gateway timeout</html>");
        assert!(
            matches!(result, Err(PollError::FetchError(_))),
            "non-JSON body must be a FetchError, got {:?}",
            result
        );
    }

    #[test]
    fn test_item_with_absent_substructures_parses() {
        // guest/monthly arrays may be missing entirely.
        let body = r#"{"result": {"bays": [{"carpark_id": "W006"}]}}"#;
        let items = parse_vacancy_response(body).unwrap();
        assert!(items[0].guest.is_empty());
        assert!(items[0].monthly.is_empty());
        assert!(items[0].last_update.is_none());
    }

    #[test]
    fn test_item_with_extra_fields_parses() {
        let body = r#"{"result": {"bays": [
            {"carpark_id": "W007", "guest": [{"available": 2, "total": 50, "floor": "B1"}],
             "promo_banner": "20% off"}
        ]}}"#;
        let items = parse_vacancy_response(body).expect("extra fields must be ignored");
        assert_eq!(items[0].guest[0].available, Some(2));
    }

    #[test]
    fn test_parse_carpark_metadata_envelope() {
        let body = r#"{
            "result": {
                "carparks": [
                    {
                        "id": "W001",
                        "name": {"en_us": "Harbour Centre", "zh_hant": "海港中心"},
                        "address": {"en_us": "25 Harbour Rd, Wan Chai"},
                        "district": "Wan Chai",
                        "latitude": 22.2800, "longitude": 114.1750,
                        "guest_total": 130, "monthly_total": 40,
                        "ev_charging": true
                    }
                ]
            }
        }"#;
        let infos = parse_carpark_response(body).expect("metadata envelope should parse");
        assert_eq!(infos.len(), 1);

        let carpark = infos[0].clone().into_carpark().expect("complete record");
        assert_eq!(carpark.id, "W001");
        assert_eq!(carpark.name_en.as_deref(), Some("Harbour Centre"));
        assert_eq!(carpark.district.as_deref(), Some("Wan Chai"));
        assert_eq!(carpark.guest_total, Some(130));
        assert!(carpark.has_ev_charging);
    }

    #[test]
    fn test_metadata_record_without_id_is_malformed() {
        let info = CarparkInfo::default();
        let result = info.into_carpark();
        assert!(matches!(result, Err(PollError::MalformedRecord(_))));
    }

    #[test]
    fn test_metadata_record_with_empty_id_is_malformed() {
        let info = CarparkInfo {
            id: Some(String::new()),
            ..CarparkInfo::default()
        };
        assert!(matches!(
            info.into_carpark(),
            Err(PollError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_metadata_defaults_for_sparse_record() {
        let info = CarparkInfo {
            id: Some("W009".to_string()),
            ..CarparkInfo::default()
        };
        let carpark = info.into_carpark().unwrap();
        assert!(carpark.name_en.is_none());
        assert!(!carpark.has_ev_charging);
        assert!(carpark.guest_total.is_none());
    }
}

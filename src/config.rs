/// Service configuration, loaded from `parkmon.toml`.
///
/// The database connection string is deliberately not part of the file: it
/// comes from the `DATABASE_URL` environment variable (via dotenv), so
/// credentials never land in a checked-in config.
///
/// A missing config file falls back to the documented defaults; an invalid
/// file or invalid values are fatal at startup, never per-cycle.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::model::PollError;

pub const DEFAULT_CONFIG_PATH: &str = "parkmon.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub caps: CapConfig,
    pub aggregation: AggregationConfig,
}

/// Availability API endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the provider's mobile API.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Truncation thresholds per reading kind.
///
/// The guest cap is observed API behavior (the "10+" display), not documented
/// by the provider. Monthly bays have no numeric cap — the provider signals a
/// boolean full flag instead, so no threshold appears here for them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapConfig {
    pub guest: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Fixed offset from UTC used to bucket snapshots into local date/hour.
    /// The provider operates in Hong Kong time (UTC+8).
    pub utc_offset_hours: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api: ApiConfig::default(),
            caps: CapConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "https://mobile-prod.wilsonparkingapp.com/".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for CapConfig {
    fn default() -> Self {
        CapConfig { guest: 10 }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig { utc_offset_hours: 8 }
    }
}

impl Config {
    /// Loads configuration from `parkmon.toml` in the working directory.
    pub fn load() -> Result<Self, PollError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from the given path. A missing file yields the
    /// defaults; a file that exists but cannot be read or parsed is fatal —
    /// a permission problem must not silently run the service on defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, PollError> {
        let config = match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str::<Config>(&contents).map_err(|e| {
                PollError::InvalidConfiguration(format!(
                    "failed to parse {}: {}",
                    path.as_ref().display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                return Err(PollError::InvalidConfiguration(format!(
                    "cannot read {}: {}",
                    path.as_ref().display(),
                    e
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every value the rest of the service assumes to be sane.
    pub fn validate(&self) -> Result<(), PollError> {
        if self.api.base_url.is_empty() {
            return Err(PollError::InvalidConfiguration(
                "api.base_url must not be empty".to_string(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(PollError::InvalidConfiguration(
                "api.timeout_secs must be positive".to_string(),
            ));
        }
        if self.caps.guest <= 0 {
            return Err(PollError::InvalidConfiguration(format!(
                "caps.guest must be positive, got {}",
                self.caps.guest
            )));
        }
        if !(-12..=14).contains(&self.aggregation.utc_offset_hours) {
            return Err(PollError::InvalidConfiguration(format!(
                "aggregation.utc_offset_hours out of range: {}",
                self.aggregation.utc_offset_hours
            )));
        }
        Ok(())
    }
}

/// Reads `DATABASE_URL` from the environment. Call `dotenv::dotenv()` first
/// so a local `.env` file is honored.
pub fn database_url() -> Result<String, PollError> {
    std::env::var("DATABASE_URL").map_err(|_| {
        PollError::InvalidConfiguration(
            "DATABASE_URL is not set (add it to the environment or a .env file)".to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().expect("defaults must validate");
        assert_eq!(config.caps.guest, 10);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.aggregation.utc_offset_hours, 8);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path("/nonexistent/parkmon.toml")
            .expect("missing file should fall back to defaults");
        assert_eq!(config.caps.guest, Config::default().caps.guest);
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_omitted_sections() {
        let parsed: Config = toml::from_str("[caps]\nguest = 25\n").unwrap();
        assert_eq!(parsed.caps.guest, 25);
        assert_eq!(parsed.api.timeout_secs, 30, "omitted sections keep defaults");
    }

    #[test]
    fn test_zero_guest_cap_fails_validation() {
        let mut config = Config::default();
        config.caps.guest = 0;
        let result = config.validate();
        assert!(
            matches!(result, Err(PollError::InvalidConfiguration(_))),
            "zero cap must be rejected at startup, got {:?}",
            result
        );
    }

    #[test]
    fn test_empty_base_url_fails_validation() {
        let mut config = Config::default();
        config.api.base_url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreadable_file_is_fatal_not_defaulted() {
        // A directory at the config path reads with an error that is not
        // NotFound; that must surface, not fall back to defaults.
        let result = Config::load_from_path(std::env::temp_dir());
        assert!(
            matches!(result, Err(PollError::InvalidConfiguration(_))),
            "read failure other than NotFound must be fatal, got {:?}",
            result
        );
    }

    #[test]
    fn test_unparseable_file_is_fatal() {
        let path = std::env::temp_dir().join("parkmon_test_bad_config.toml");
        std::fs::write(&path, "this is not toml {{{{").unwrap();
        let result = Config::load_from_path(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(PollError::InvalidConfiguration(_))));
    }
}

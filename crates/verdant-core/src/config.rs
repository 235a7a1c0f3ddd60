use std::time::Duration;

use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VerdantError};

pub const DEFAULT_API_BASE_URL: &str = "https://api.verdant.dev";
pub const DEFAULT_AREA_CODE: &str = "BE";
pub const DEFAULT_REFERENCE_TIMEZONE: &str = "Europe/Brussels";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_EVALUATION_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_DAILY_REFRESH_BASE_HOUR: u8 = 19;
pub const DEFAULT_DAILY_REFRESH_WINDOW_MINUTES: u32 = 30;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Top-level config (verdant.toml + VERDANT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdantConfig {
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Where and how the forecast provider is queried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Area the forecast is requested for. Empty disables refreshing.
    #[serde(default = "default_area_code")]
    pub area_code: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// IANA zone used for calendar-day decisions when the snapshot carries none.
    #[serde(default = "default_reference_timezone")]
    pub reference_timezone: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            area_code: default_area_code(),
            api_base_url: default_api_base_url(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            reference_timezone: default_reference_timezone(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl ForecastConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn reference_zone(&self) -> Result<Tz> {
        parse_timezone(&self.reference_timezone)
    }
}

/// Cadence of the two periodic task families.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_evaluation_poll_interval_ms")]
    pub evaluation_poll_interval_ms: u64,
    /// Local hour-of-day (0–23) the daily forecast refresh starts from.
    #[serde(default = "default_daily_refresh_base_hour")]
    pub daily_refresh_base_hour: u8,
    /// Width of the random offset added to the base hour.
    #[serde(default = "default_daily_refresh_window_minutes")]
    pub daily_refresh_window_minutes: u32,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Page size used when reading awaiting jobs. Every pass still walks
    /// all of them.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            evaluation_poll_interval_ms: DEFAULT_EVALUATION_POLL_INTERVAL_MS,
            daily_refresh_base_hour: DEFAULT_DAILY_REFRESH_BASE_HOUR,
            daily_refresh_window_minutes: DEFAULT_DAILY_REFRESH_WINDOW_MINUTES,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SchedulerConfig {
    pub fn evaluation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_area_code() -> String {
    DEFAULT_AREA_CODE.to_string()
}
fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}
fn default_reference_timezone() -> String {
    DEFAULT_REFERENCE_TIMEZONE.to_string()
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}
fn default_evaluation_poll_interval_ms() -> u64 {
    DEFAULT_EVALUATION_POLL_INTERVAL_MS
}
fn default_daily_refresh_base_hour() -> u8 {
    DEFAULT_DAILY_REFRESH_BASE_HOUR
}
fn default_daily_refresh_window_minutes() -> u32 {
    DEFAULT_DAILY_REFRESH_WINDOW_MINUTES
}
fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.verdant/verdant.db", home)
}

/// Parse an IANA time zone name such as `Europe/Brussels`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| VerdantError::UnknownTimezone(name.to_string()))
}

impl VerdantConfig {
    /// Load config from a TOML file with VERDANT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.verdant/verdant.toml
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `VERDANT_FORECAST__AREA_CODE=NL`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: VerdantConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("VERDANT_").split("__"))
            .extract()
            .map_err(|e| VerdantError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.daily_refresh_base_hour > 23 {
            return Err(VerdantError::Config(format!(
                "scheduler.daily_refresh_base_hour must be 0-23, got {}",
                self.scheduler.daily_refresh_base_hour
            )));
        }
        if self.scheduler.evaluation_poll_interval_ms == 0 {
            return Err(VerdantError::Config(
                "scheduler.evaluation_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.scheduler.batch_size == 0 {
            return Err(VerdantError::Config(
                "scheduler.batch_size must be positive".to_string(),
            ));
        }
        if self.forecast.max_attempts == 0 {
            return Err(VerdantError::Config(
                "forecast.max_attempts must be at least 1".to_string(),
            ));
        }
        self.forecast.reference_zone()?;
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.verdant/verdant.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = VerdantConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.forecast.max_attempts, 3);
        assert_eq!(config.forecast.retry_backoff(), Duration::from_secs(1));
        assert_eq!(
            config.forecast.reference_zone().unwrap(),
            chrono_tz::Europe::Brussels
        );
    }

    #[test]
    fn rejects_out_of_range_hour() {
        let mut config = VerdantConfig::default();
        config.scheduler.daily_refresh_base_hour = 24;
        assert_eq!(config.validate().unwrap_err().code(), "CONFIG_ERROR");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = VerdantConfig::default();
        config.scheduler.batch_size = 0;
        assert_eq!(config.validate().unwrap_err().code(), "CONFIG_ERROR");
    }

    #[test]
    fn rejects_unknown_zone() {
        let mut config = VerdantConfig::default();
        config.forecast.reference_timezone = "Mars/Olympus_Mons".to_string();
        assert_eq!(config.validate().unwrap_err().code(), "UNKNOWN_TIMEZONE");
    }

    #[test]
    fn load_merges_toml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "verdant.toml",
                r#"
                [forecast]
                area_code = "NL"
                read_timeout_ms = 2500

                [scheduler]
                daily_refresh_base_hour = 6
                "#,
            )?;
            jail.set_env("VERDANT_SCHEDULER__EVALUATION_POLL_INTERVAL_MS", "1500");

            let config = VerdantConfig::load(Some("verdant.toml")).expect("config loads");
            assert_eq!(config.forecast.area_code, "NL");
            assert_eq!(config.forecast.read_timeout(), Duration::from_millis(2500));
            assert_eq!(config.forecast.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
            assert_eq!(config.scheduler.daily_refresh_base_hour, 6);
            assert_eq!(config.scheduler.evaluation_poll_interval_ms, 1500);
            Ok(())
        });
    }
}

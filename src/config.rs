//! Tracker configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Numeric settings fall back to their
//! defaults when missing or unparsable; deadline dates are strict.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::ConfigError;
use crate::forecast::AdditiveTrendModel;
use crate::service::{CollectorSettings, ForecastSettings};
use crate::upstream::{RetryPolicy, UPSTREAM_MAX_PAGE_SIZE};

/// Default end of the unit distribution period.
pub const DEFAULT_DISTRIBUTION_END: &str = "2026-04-15 23:59:59";

/// Default redemption deadline, the forecast horizon.
pub const DEFAULT_REDEMPTION_END: &str = "2026-04-22 23:59:59";

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Top-level tracker configuration.
///
/// Loaded once at startup via [`TrackerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Upstream listing endpoint.
    pub upstream_url: String,

    /// Records requested per page (capped at 100).
    pub page_size: usize,

    /// Minimum spacing between consecutive upstream requests.
    pub rate_limit_delay: Duration,

    /// Attempts per page before giving up.
    pub retry_attempts: u32,

    /// Backoff after the first failed attempt; doubles per attempt.
    pub retry_base_delay: Duration,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    /// `User-Agent` header sent upstream.
    pub user_agent: String,

    /// Age after which a collection lock marker is considered abandoned.
    pub lock_timeout: Duration,

    /// Directory holding lock markers.
    pub lock_dir: PathBuf,

    /// Directory holding snapshots and the `latest.json` alias.
    pub data_dir: PathBuf,

    /// Directory holding prediction tables.
    pub predictions_dir: PathBuf,

    /// Minimum snapshots an entity needs before it is forecast.
    pub min_data_points: usize,

    /// End of the distribution period (always a checkpoint when in range).
    pub distribution_end: DateTime<Utc>,

    /// Forecast horizon.
    pub redemption_end: DateTime<Utc>,

    /// Days between regular checkpoints.
    pub checkpoint_interval_days: u32,

    /// Series span in hours before daily seasonality is fitted.
    pub seasonality_min_span_hours: u32,

    /// Total payout shared across all units, when known.
    pub prize_pool: Option<f64>,

    /// Debug cap on entities collected and forecast.
    pub limit_entities: Option<usize>,

    /// Tracing output format.
    pub log_format: LogFormat,
}

impl TrackerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a deadline date cannot be
    /// parsed or the redemption deadline precedes the distribution end.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`TrackerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let upstream_url = lookup("UPSTREAM_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8080/api/v1/listing".to_string());

        let page_size = parse_var(&lookup, "PAGE_SIZE", UPSTREAM_MAX_PAGE_SIZE)
            .clamp(1, UPSTREAM_MAX_PAGE_SIZE);
        let rate_limit_delay = Duration::from_millis(parse_var(&lookup, "RATE_LIMIT_DELAY", 20));
        let retry_attempts = parse_var(&lookup, "RETRY_ATTEMPTS", 3_u32).max(1);
        let retry_base_delay =
            Duration::from_millis(parse_var(&lookup, "RETRY_BASE_DELAY", 100_u64).max(1));
        let request_timeout = Duration::from_secs(parse_var(&lookup, "REQUEST_TIMEOUT", 30));
        let user_agent = lookup("USER_AGENT")
            .unwrap_or_else(|| format!("voucher-tracker/{}", env!("CARGO_PKG_VERSION")));

        let lock_timeout = Duration::from_secs(parse_var(&lookup, "LOCK_TIMEOUT", 600));
        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let lock_dir = lookup("LOCK_DIR").map_or_else(|| data_dir.clone(), PathBuf::from);
        let predictions_dir = lookup("PREDICTIONS_DIR")
            .map_or_else(|| data_dir.join("predictions"), PathBuf::from);

        let min_data_points = parse_var(&lookup, "MIN_DATA_POINTS", 3_usize).max(2);
        let distribution_end = parse_date(&lookup, "DISTRIBUTION_END_DATE", DEFAULT_DISTRIBUTION_END)?;
        let redemption_end = parse_date(&lookup, "REDEMPTION_END_DATE", DEFAULT_REDEMPTION_END)?;
        if redemption_end < distribution_end {
            return Err(ConfigError::InvalidValue {
                key: "REDEMPTION_END_DATE",
                value: redemption_end.to_rfc3339(),
                reason: "must not precede DISTRIBUTION_END_DATE".to_string(),
            });
        }
        let checkpoint_interval_days = parse_var(&lookup, "CHECKPOINT_INTERVAL_DAYS", 7_u32).max(1);
        let seasonality_min_span_hours = parse_var(&lookup, "SEASONALITY_MIN_SPAN", 48_u32);

        let prize_pool = lookup("PRIZE_POOL")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0);
        let limit_entities = lookup("LIMIT_ENTITIES")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0);
        let log_format = parse_var(&lookup, "LOG_FORMAT", LogFormat::Text);

        Ok(Self {
            upstream_url,
            page_size,
            rate_limit_delay,
            retry_attempts,
            retry_base_delay,
            request_timeout,
            user_agent,
            lock_timeout,
            lock_dir,
            data_dir,
            predictions_dir,
            min_data_points,
            distribution_end,
            redemption_end,
            checkpoint_interval_days,
            seasonality_min_span_hours,
            prize_pool,
            limit_entities,
            log_format,
        })
    }

    /// Retry policy for the rate-limited fetcher.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            base_delay: self.retry_base_delay,
        }
    }

    /// Settings for the snapshot collector.
    #[must_use]
    pub const fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            page_size: self.page_size,
            lock_ttl: self.lock_timeout,
            limit_entities: self.limit_entities,
            prize_pool: self.prize_pool,
        }
    }

    /// Settings for the forecasting engine.
    #[must_use]
    pub fn forecast_settings(&self) -> ForecastSettings {
        ForecastSettings {
            min_data_points: self.min_data_points,
            distribution_end: self.distribution_end,
            redemption_end: self.redemption_end,
            checkpoint_interval: chrono::Duration::days(i64::from(self.checkpoint_interval_days)),
            limit_entities: self.limit_entities,
            prize_pool: self.prize_pool,
        }
    }

    /// The default trend model configured with the seasonality threshold.
    #[must_use]
    pub fn trend_model(&self) -> AdditiveTrendModel {
        AdditiveTrendModel::new(chrono::Duration::hours(i64::from(
            self.seasonality_min_span_hours,
        )))
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a deadline as `YYYY-MM-DD HH:MM:SS` (UTC) or RFC 3339.
fn parse_date<F>(lookup: &F, key: &'static str, default: &str) -> Result<DateTime<Utc>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    parse_deadline(raw.trim()).ok_or_else(|| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
        reason: "expected `YYYY-MM-DD HH:MM:SS` or RFC 3339".to_string(),
    })
}

/// Parses a deadline string; naive values are taken as UTC.
#[must_use]
pub fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<TrackerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        TrackerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let Ok(cfg) = load(&[]) else {
            panic!("defaults must load");
        };
        assert_eq!(cfg.page_size, 100);
        assert_eq!(cfg.rate_limit_delay, Duration::from_millis(20));
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.lock_timeout, Duration::from_secs(600));
        assert_eq!(cfg.min_data_points, 3);
        assert_eq!(cfg.lock_dir, PathBuf::from("data"));
        assert_eq!(cfg.predictions_dir, PathBuf::from("data").join("predictions"));
        assert_eq!(cfg.prize_pool, None);
        assert_eq!(cfg.limit_entities, None);
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(
            cfg.redemption_end.format("%Y-%m-%d %H:%M:%S").to_string(),
            DEFAULT_REDEMPTION_END
        );
    }

    #[test]
    fn page_size_is_capped_at_upstream_maximum() {
        let Ok(cfg) = load(&[("PAGE_SIZE", "500")]) else {
            panic!("config must load");
        };
        assert_eq!(cfg.page_size, 100);

        let Ok(cfg) = load(&[("PAGE_SIZE", "0")]) else {
            panic!("config must load");
        };
        assert_eq!(cfg.page_size, 1);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let Ok(cfg) = load(&[("RETRY_ATTEMPTS", "many"), ("LOCK_TIMEOUT", "-3")]) else {
            panic!("config must load");
        };
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.lock_timeout, Duration::from_secs(600));
    }

    #[test]
    fn optional_caps_parse() {
        let Ok(cfg) = load(&[
            ("LIMIT_ENTITIES", "25"),
            ("PRIZE_POOL", "3000000"),
            ("LOG_FORMAT", "JSON"),
        ]) else {
            panic!("config must load");
        };
        assert_eq!(cfg.limit_entities, Some(25));
        assert_eq!(cfg.prize_pool, Some(3_000_000.0));
        assert_eq!(cfg.log_format, LogFormat::Json);

        let Ok(cfg) = load(&[("LIMIT_ENTITIES", "0"), ("PRIZE_POOL", "-1")]) else {
            panic!("config must load");
        };
        assert_eq!(cfg.limit_entities, None);
        assert_eq!(cfg.prize_pool, None);
    }

    #[test]
    fn bad_deadline_is_rejected() {
        let result = load(&[("REDEMPTION_END_DATE", "next tuesday")]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "REDEMPTION_END_DATE",
                ..
            })
        ));
    }

    #[test]
    fn redemption_before_distribution_is_rejected() {
        let result = load(&[
            ("DISTRIBUTION_END_DATE", "2026-04-15 23:59:59"),
            ("REDEMPTION_END_DATE", "2026-04-01T00:00:00Z"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn deadline_accepts_both_formats() {
        let naive = parse_deadline("2026-04-22 23:59:59");
        let rfc = parse_deadline("2026-04-22T23:59:59+00:00");
        assert!(naive.is_some());
        assert_eq!(naive, rfc);
    }
}

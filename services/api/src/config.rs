//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::{Duration, FixedOffset};
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Fixed offset that defines the "calendar day" for attendance.
    pub attendance_offset: FixedOffset,
    pub completion_threshold: f64,
    pub cors_allowed_origin: String,
}

const MIN_SECRET_LEN: usize = 32;
/// One week.
const MAX_ACCESS_TTL_MINUTES: i64 = 7 * 24 * 60;
/// Ten years.
const MAX_REFRESH_TTL_DAYS: i64 = 3650;

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Credential Settings ---
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| ConfigError::MissingVar("JWT_SECRET".to_string()))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue(
                "JWT_SECRET".to_string(),
                format!("must be at least {} bytes", MIN_SECRET_LEN),
            ));
        }

        let access_minutes =
            parse_positive("ACCESS_TOKEN_TTL_MINUTES", 30, MAX_ACCESS_TTL_MINUTES)?;
        let refresh_days = parse_positive("REFRESH_TOKEN_TTL_DAYS", 14, MAX_REFRESH_TTL_DAYS)?;

        // --- Load Tracking Settings ---
        let offset_str =
            std::env::var("ATTENDANCE_UTC_OFFSET").unwrap_or_else(|_| "+09:00".to_string());
        let attendance_offset = parse_utc_offset(&offset_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "ATTENDANCE_UTC_OFFSET".to_string(),
                format!("'{}' is not an offset like +09:00", offset_str),
            )
        })?;

        let threshold_str =
            std::env::var("COMPLETION_THRESHOLD").unwrap_or_else(|_| "0.9".to_string());
        let completion_threshold = threshold_str
            .parse::<f64>()
            .ok()
            .filter(|t| *t > 0.0 && *t <= 1.0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "COMPLETION_THRESHOLD".to_string(),
                    format!("'{}' is not a ratio in (0, 1]", threshold_str),
                )
            })?;

        let cors_allowed_origin = std::env::var("CORS_ALLOWED_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            jwt_secret,
            access_token_ttl: Duration::minutes(access_minutes),
            refresh_token_ttl: Duration::days(refresh_days),
            attendance_offset,
            completion_threshold,
            cors_allowed_origin,
        })
    }
}

fn parse_positive(var: &str, default: i64, max: i64) -> Result<i64, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => parse_bounded(var, &raw, max),
    }
}

/// Parses an integer in `1..=max`.
fn parse_bounded(var: &str, raw: &str, max: i64) -> Result<i64, ConfigError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|v| (1..=max).contains(v))
        .ok_or_else(|| {
            ConfigError::InvalidValue(
                var.to_string(),
                format!("'{}' is not a whole number between 1 and {}", raw, max),
            )
        })
}

/// Parses `+HH:MM` / `-HH:MM` into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signed_offsets() {
        assert_eq!(parse_utc_offset("+09:00").unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(parse_utc_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert!(parse_utc_offset("09:00").is_none());
        assert!(parse_utc_offset("+9").is_none());
        assert!(parse_utc_offset("+15:00").is_none());
        assert!(parse_utc_offset("").is_none());
    }

    #[test]
    fn token_lifetimes_must_be_in_range() {
        let var = "ACCESS_TOKEN_TTL_MINUTES";
        assert_eq!(parse_bounded(var, "30", MAX_ACCESS_TTL_MINUTES).unwrap(), 30);
        assert_eq!(
            parse_bounded(var, "10080", MAX_ACCESS_TTL_MINUTES).unwrap(),
            MAX_ACCESS_TTL_MINUTES
        );

        for raw in ["0", "-5", "10081", "abc", "9223372036854775807"] {
            assert!(matches!(
                parse_bounded(var, raw, MAX_ACCESS_TTL_MINUTES),
                Err(ConfigError::InvalidValue(ref v, _)) if v == var
            ));
        }
        assert!(parse_bounded("REFRESH_TOKEN_TTL_DAYS", "3651", MAX_REFRESH_TTL_DAYS).is_err());
    }
}

//! Server configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use relay_bus::domain::retry::RetryPolicy;

use crate::error::AppError;

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Pool size.
    pub database_max_connections: u32,
    /// Retry budget and backoff stamped on new events.
    pub retry_policy: RetryPolicy,
    /// OTLP collector; span export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                        | Default     |
    /// |--------------------------------|-------------|
    /// | `DATABASE_URL`                 | required    |
    /// | `HOST`                         | `0.0.0.0`   |
    /// | `PORT`                         | `3000`      |
    /// | `DATABASE_MAX_CONNECTIONS`     | `10`        |
    /// | `BUS_MAX_RETRIES`              | `5`         |
    /// | `BUS_RETRY_BASE_DELAY_MS`      | `1000`      |
    /// | `BUS_RETRY_MAX_DELAY_MS`       | `300000`    |
    /// | `BUS_RETRY_EXPONENTIAL_FACTOR` | `2.0`       |
    /// | `OTEL_EXPORTER_OTLP_ENDPOINT`  | unset       |
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config("DATABASE_URL environment variable must be set".to_owned())
            })?;

        let defaults = RetryPolicy::default();
        let max_retries: i32 = parse_or(&lookup, "BUS_MAX_RETRIES", defaults.max_retries)?;
        if max_retries < 0 {
            return Err(AppError::Config(format!(
                "BUS_MAX_RETRIES must not be negative, got {max_retries}"
            )));
        }
        let base_delay_ms: u64 = parse_or(&lookup, "BUS_RETRY_BASE_DELAY_MS", 1_000)?;
        let max_delay_ms: u64 = parse_or(&lookup, "BUS_RETRY_MAX_DELAY_MS", 300_000)?;
        if base_delay_ms > max_delay_ms {
            return Err(AppError::Config(format!(
                "BUS_RETRY_BASE_DELAY_MS ({base_delay_ms}) must not exceed BUS_RETRY_MAX_DELAY_MS ({max_delay_ms})"
            )));
        }
        let exponential_factor: f64 = parse_or(
            &lookup,
            "BUS_RETRY_EXPONENTIAL_FACTOR",
            defaults.exponential_factor,
        )?;
        if !exponential_factor.is_finite() || exponential_factor < 1.0 {
            return Err(AppError::Config(format!(
                "BUS_RETRY_EXPONENTIAL_FACTOR must be a finite number >= 1, got {exponential_factor}"
            )));
        }

        Ok(Self {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&lookup, "PORT", 3000)?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            retry_policy: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(base_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                exponential_factor,
            },
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .filter(|endpoint| !endpoint.trim().is_empty()),
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid ('{raw}'): {e}"))),
    }
}

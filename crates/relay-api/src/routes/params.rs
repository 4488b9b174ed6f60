//! Parsing of raw query-string and body values into typed inputs.
//!
//! Values arrive as strings so that malformed input surfaces as a
//! `validation_error` body rather than an extractor rejection.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use relay_core::error::BusError;

/// Parses an optional closed-set value (topic, module, status).
pub(crate) fn parse_enum<T>(value: Option<&str>) -> Result<Option<T>, BusError>
where
    T: FromStr<Err = BusError>,
{
    value.filter(|v| !v.is_empty()).map(str::parse).transpose()
}

/// Parses an optional integer.
pub(crate) fn parse_int<T>(field: &str, value: Option<&str>) -> Result<Option<T>, BusError>
where
    T: FromStr,
{
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.trim().parse().map_err(|_| {
                BusError::Validation(format!("{field} must be an integer, got '{v}'"))
            })
        })
        .transpose()
}

/// Parses an optional RFC 3339 timestamp or `YYYY-MM-DD` date; a bare date
/// means midnight UTC.
pub(crate) fn parse_timestamp(
    field: &str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, BusError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            let v = v.trim();
            DateTime::parse_from_rfc3339(v)
                .map(|ts| ts.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDate::parse_from_str(v, "%Y-%m-%d")
                        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
                })
                .map_err(|_| {
                    BusError::Validation(format!(
                        "{field} must be an RFC 3339 timestamp or YYYY-MM-DD date, got '{v}'"
                    ))
                })
        })
        .transpose()
}

//! Datetime parsing and formatting
//!
//! Timestamps are persisted as fixed-width UTC text with nanosecond precision
//! (`YYYY-MM-DD HH:MM:SS.nnnnnnnnn`) so that range predicates on the text
//! columns order correctly and stored values read back unchanged. Query
//! parameters coming in over HTTP are parsed with [`DateTimeParser::parse_flexible`].
//!
//! # Usage
//!
//! ```rust
//! use jobkeeper::utils::datetime::DateTimeParser;
//!
//! let dt = DateTimeParser::parse_flexible("2023-01-01T12:00:00Z").unwrap();
//! let stored = DateTimeParser::format_for_storage(&dt);
//! assert_eq!(stored, "2023-01-01 12:00:00.000000000");
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Errors that can occur during datetime operations
#[derive(Error, Debug)]
pub enum DateTimeError {
    /// Invalid datetime format provided
    #[error("Invalid datetime format: '{input}' - expected formats: RFC3339 (2023-01-01T12:00:00Z), SQLite (2023-01-01 12:00:00) or a date (2023-01-01)")]
    InvalidFormat { input: String },
}

/// Centralized datetime parsing and formatting utilities
pub struct DateTimeParser;

impl DateTimeParser {
    /// Parse datetime from the formats accepted at the API boundary
    ///
    /// Supports:
    /// - RFC3339 with timezone or offset: "2023-01-01T12:00:00Z"
    /// - SQLite format, optionally with fractional seconds (assumes UTC)
    /// - ISO without timezone (assumes UTC)
    /// - a bare date, interpreted as midnight UTC
    pub fn parse_flexible(datetime_str: &str) -> Result<DateTime<Utc>, DateTimeError> {
        let trimmed = datetime_str.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(dt.with_timezone(&Utc));
        }

        let naive_formats = [
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M",
        ];

        for format in &naive_formats {
            if let Ok(naive_dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            if let Some(naive_dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
            }
        }

        Err(DateTimeError::InvalidFormat {
            input: datetime_str.to_string(),
        })
    }

    /// Parse a value written by [`DateTimeParser::format_for_storage`]
    pub fn parse_stored(stored: &str) -> Result<DateTime<Utc>, DateTimeError> {
        NaiveDateTime::parse_from_str(stored.trim(), STORAGE_FORMAT)
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
            .or_else(|_| Self::parse_flexible(stored))
    }

    /// Format datetime for storage in SQLite
    ///
    /// Always nanosecond precision so stored values compare lexicographically.
    pub fn format_for_storage(dt: &DateTime<Utc>) -> String {
        dt.format(STORAGE_FORMAT).to_string()
    }

}

/// Serde helper for optional datetime query parameters
///
/// Use with `#[serde(default, deserialize_with = "deserialize_optional_datetime")]`.
/// Empty strings are treated as absent.
pub fn deserialize_optional_datetime<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    match opt {
        Some(s) if !s.trim().is_empty() => DateTimeParser::parse_flexible(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_parse_rfc3339() {
        let dt = DateTimeParser::parse_flexible("2023-01-01T12:00:00Z").unwrap();
        assert_eq!(dt.year(), 2023);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 1);
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn test_parse_with_offset() {
        let dt = DateTimeParser::parse_flexible("2023-01-01T12:00:00+02:00").unwrap();
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn test_parse_bare_date() {
        let dt = DateTimeParser::parse_flexible("2024-02-29").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_format() {
        match DateTimeParser::parse_flexible("yesterday") {
            Err(DateTimeError::InvalidFormat { input }) => assert_eq!(input, "yesterday"),
            other => panic!("Expected InvalidFormat error, got {:?}", other),
        }
    }

    #[test]
    fn test_storage_format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap();
        let fractional = whole + chrono::Duration::milliseconds(250);

        assert_eq!(
            DateTimeParser::format_for_storage(&whole),
            "2023-01-01 12:00:00.000000000"
        );
        assert_eq!(
            DateTimeParser::format_for_storage(&fractional),
            "2023-01-01 12:00:00.250000000"
        );
        assert!(
            DateTimeParser::format_for_storage(&whole)
                < DateTimeParser::format_for_storage(&fractional)
        );
    }

    #[test]
    fn test_parse_stored_keeps_full_precision() {
        let dt = Utc.with_ymd_and_hms(2023, 6, 30, 23, 59, 59).unwrap()
            + chrono::Duration::nanoseconds(999_123_457);
        let stored = DateTimeParser::format_for_storage(&dt);
        assert_eq!(DateTimeParser::parse_stored(&stored).unwrap(), dt);

        let now = Utc::now();
        let stored = DateTimeParser::format_for_storage(&now);
        assert_eq!(DateTimeParser::parse_stored(&stored).unwrap(), now);
    }

    #[test]
    fn test_parse_stored_accepts_millisecond_rows() {
        let dt = DateTimeParser::parse_stored("2023-06-30 23:59:59.250").unwrap();
        assert_eq!(
            dt,
            Utc.with_ymd_and_hms(2023, 6, 30, 23, 59, 59).unwrap()
                + chrono::Duration::milliseconds(250)
        );
    }
}

//! # Date Handling Utilities
//!
//! Lenient parsing of the date strings providers and users hand us, and the
//! strict UTC renderings the mapping converters emit.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Sub-second precision used when rendering ISO-8601 timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePrecision {
    Seconds,
    #[default]
    Milliseconds,
    Microseconds,
}

impl TimePrecision {
    /// Parses the `timespec` names used in mapping templates.
    pub fn from_timespec(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "seconds" => Some(Self::Seconds),
            "milliseconds" => Some(Self::Milliseconds),
            "microseconds" => Some(Self::Microseconds),
            _ => None,
        }
    }

    fn seconds_format(self) -> SecondsFormat {
        match self {
            Self::Seconds => SecondsFormat::Secs,
            Self::Milliseconds => SecondsFormat::Millis,
            Self::Microseconds => SecondsFormat::Micros,
        }
    }
}

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%S",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Parses a timestamp into UTC.
///
/// Accepts RFC 3339 with any offset, naive date-times (taken as UTC) and
/// plain dates (midnight UTC).
///
/// # Example
/// ```rust
/// use eogate_util::date_handling::parse_datetime_utc;
///
/// let parsed = parse_datetime_utc("2021-03-01T12:00:00+02:00").unwrap();
/// assert_eq!(parsed.to_rfc3339(), "2021-03-01T10:00:00+00:00");
///
/// assert!(parse_datetime_utc("2021-03-01").is_some());
/// assert!(parse_datetime_utc("yesterday").is_none());
/// ```
pub fn parse_datetime_utc(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Renders a UTC timestamp as ISO-8601 with a `Z` suffix.
///
/// # Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use eogate_util::date_handling::{format_iso_utc, TimePrecision};
///
/// let value = Utc.with_ymd_and_hms(2020, 5, 17, 8, 0, 0).unwrap();
/// assert_eq!(format_iso_utc(&value, TimePrecision::Milliseconds), "2020-05-17T08:00:00.000Z");
/// assert_eq!(format_iso_utc(&value, TimePrecision::Seconds), "2020-05-17T08:00:00Z");
/// ```
pub fn format_iso_utc(value: &DateTime<Utc>, precision: TimePrecision) -> String {
    value.to_rfc3339_opts(precision.seconds_format(), true)
}

pub fn format_iso_date(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d").to_string()
}

/// Milliseconds since the Unix epoch for a parsable timestamp.
pub fn timestamp_millis(text: &str) -> Option<i64> {
    parse_datetime_utc(text).map(|value| value.timestamp_millis())
}

pub fn from_timestamp_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

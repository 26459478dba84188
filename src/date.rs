//! Normalization of heterogeneous date inputs into UTC instants.
//!
//! Policies accept dates as ISO 8601 strings, chrono values, or Unix
//! timestamps. Everything is converted to `DateTime<Utc>` once, at
//! construction time, so evaluation never deals with offsets.

use crate::error::DateParseError;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

/// Date-time layouts without an offset. Interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Date-time layouts with a numeric offset that RFC 3339 parsing rejects.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
];

/// A date accepted at policy construction time.
#[derive(Debug, Clone, PartialEq)]
pub enum DateInput {
    /// ISO 8601 date or date-time (RFC 2822 / HTTP-date also accepted)
    Text(String),
    /// Already absolute
    Utc(DateTime<Utc>),
    /// Absolute with an explicit offset
    Offset(DateTime<FixedOffset>),
    /// Wall-clock value without offset, treated as UTC
    Naive(NaiveDateTime),
    /// Calendar date, midnight UTC
    Date(NaiveDate),
    /// Seconds since the Unix epoch
    Timestamp(i64),
    /// Fractional seconds since the Unix epoch
    FractionalTimestamp(f64),
}

impl DateInput {
    /// Convert this input into an absolute UTC instant.
    pub fn normalize(&self) -> Result<DateTime<Utc>, DateParseError> {
        match self {
            DateInput::Text(text) => parse_text(text),
            DateInput::Utc(dt) => Ok(*dt),
            DateInput::Offset(dt) => Ok(dt.with_timezone(&Utc)),
            DateInput::Naive(naive) => Ok(naive.and_utc()),
            DateInput::Date(date) => Ok(midnight_utc(*date)),
            DateInput::Timestamp(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .ok_or_else(|| DateParseError::new(secs.to_string(), "timestamp out of range")),
            DateInput::FractionalTimestamp(secs) => from_fractional(*secs),
        }
    }
}

/// Normalize any supported date input to UTC.
pub fn normalize(input: impl Into<DateInput>) -> Result<DateTime<Utc>, DateParseError> {
    input.into().normalize()
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn from_fractional(secs: f64) -> Result<DateTime<Utc>, DateParseError> {
    if !secs.is_finite() {
        return Err(DateParseError::new(secs.to_string(), "timestamp is not finite"));
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return Err(DateParseError::new(secs.to_string(), "timestamp out of range"));
    }
    // Rounding can carry a full second into the nanosecond part.
    let (whole, nanos) = if nanos >= 1_000_000_000 {
        (whole as i64 + 1, 0)
    } else {
        (whole as i64, nanos)
    };
    Utc.timestamp_opt(whole, nanos)
        .single()
        .ok_or_else(|| DateParseError::new(secs.to_string(), "timestamp out of range"))
}

fn parse_text(raw: &str) -> Result<DateTime<Utc>, DateParseError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(DateParseError::new(raw, "empty date string"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    // A trailing 'Z' on a layout RFC 3339 rejects (e.g. missing seconds).
    let naive_text = text
        .strip_suffix('Z')
        .or_else(|| text.strip_suffix('z'))
        .unwrap_or(text);
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(naive_text, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(midnight_utc(date));
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(DateParseError::new(raw, "unrecognized date format"))
}

impl From<&str> for DateInput {
    fn from(value: &str) -> Self {
        DateInput::Text(value.to_string())
    }
}

impl From<String> for DateInput {
    fn from(value: String) -> Self {
        DateInput::Text(value)
    }
}

impl From<DateTime<Utc>> for DateInput {
    fn from(value: DateTime<Utc>) -> Self {
        DateInput::Utc(value)
    }
}

impl From<DateTime<FixedOffset>> for DateInput {
    fn from(value: DateTime<FixedOffset>) -> Self {
        DateInput::Offset(value)
    }
}

impl From<NaiveDateTime> for DateInput {
    fn from(value: NaiveDateTime) -> Self {
        DateInput::Naive(value)
    }
}

impl From<NaiveDate> for DateInput {
    fn from(value: NaiveDate) -> Self {
        DateInput::Date(value)
    }
}

impl From<i64> for DateInput {
    fn from(value: i64) -> Self {
        DateInput::Timestamp(value)
    }
}

impl From<f64> for DateInput {
    fn from(value: f64) -> Self {
        DateInput::FractionalTimestamp(value)
    }
}

/// Configuration files carry dates as strings or bare numbers.
impl<'de> Deserialize<'de> for DateInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(secs) => DateInput::Timestamp(secs),
            Raw::Float(secs) => DateInput::FractionalTimestamp(secs),
            Raw::Text(text) => DateInput::Text(text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_date_only_is_midnight_utc() {
        assert_eq!(normalize("2024-01-01").unwrap(), utc("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_naive_datetime_string_is_utc() {
        assert_eq!(
            normalize("2025-11-01T09:30:00").unwrap(),
            utc("2025-11-01T09:30:00Z")
        );
        assert_eq!(
            normalize("2025-11-01 09:30").unwrap(),
            utc("2025-11-01T09:30:00Z")
        );
    }

    #[test]
    fn test_offset_is_converted_to_utc() {
        assert_eq!(
            normalize("2024-01-01T02:00:00+02:00").unwrap(),
            utc("2024-01-01T00:00:00Z")
        );
        assert_eq!(
            normalize("2024-01-01 02:00:00+0200").unwrap(),
            utc("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_http_date_string() {
        assert_eq!(
            normalize("Wed, 01 Jan 2025 00:00:00 GMT").unwrap(),
            utc("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(normalize(1704067200_i64).unwrap(), utc("2024-01-01T00:00:00Z"));
        assert_eq!(
            normalize(1704067200.5_f64).unwrap(),
            utc("2024-01-01T00:00:00.5Z")
        );
        assert!(normalize(f64::NAN).is_err());
    }

    #[test]
    fn test_chrono_values() {
        let offset: DateTime<FixedOffset> =
            DateTime::parse_from_rfc3339("2024-01-01T05:00:00+05:00").unwrap();
        assert_eq!(normalize(offset).unwrap(), utc("2024-01-01T00:00:00Z"));

        let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert_eq!(normalize(date).unwrap(), utc("2030-01-01T00:00:00Z"));
    }

    #[test]
    fn test_malformed_string_fails() {
        let err = normalize("next tuesday").unwrap_err();
        assert_eq!(err.input, "next tuesday");
        assert!(normalize("2024-13-45").is_err());
        assert!(normalize("   ").is_err());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let inputs: Vec<DateInput> =
            serde_yaml::from_str("[\"2024-01-01\", 1704067200, 1704067200.25]").unwrap();
        assert_eq!(inputs[0], DateInput::Text("2024-01-01".to_string()));
        assert_eq!(inputs[1], DateInput::Timestamp(1704067200));
        assert_eq!(inputs[2], DateInput::FractionalTimestamp(1704067200.25));
    }
}

//! Time-input normalization to microseconds since epoch (§6)
//!
//! Accepts ISO-8601 (trailing `Z` allowed), `YYYY-MM-DD` (UTC midnight), or
//! numeric seconds since epoch.

use crate::error::Error;
use chrono::{DateTime, NaiveDate, Utc};

/// Microseconds since the Unix epoch.
pub type EpochMicros = i64;

/// Current time as microseconds since the Unix epoch.
pub fn now_micros() -> EpochMicros {
    Utc::now().timestamp_micros()
}

/// Parse a numeric or string time input into microseconds since epoch.
pub fn normalize(input: &str) -> Result<EpochMicros, Error> {
    if let Ok(secs) = input.parse::<f64>() {
        return Ok((secs * 1_000_000.0).round() as EpochMicros);
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let dt = date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc();
        return Ok(dt.timestamp_micros());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc).timestamp_micros());
    }
    Err(Error::InvalidKeyValue {
        key: "created_at".into(),
        reason: format!("unrecognized time format: {input:?}"),
    })
}

/// Normalize a numeric seconds-since-epoch input directly (no parsing).
pub fn from_seconds(secs: f64) -> EpochMicros {
    (secs * 1_000_000.0).round() as EpochMicros
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_seconds() {
        assert_eq!(normalize("1700000000").unwrap(), 1_700_000_000_000_000);
    }

    #[test]
    fn parses_date_only_as_utc_midnight() {
        assert_eq!(
            normalize("2024-01-01").unwrap(),
            normalize("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn parses_rfc3339_with_trailing_z() {
        let got = normalize("2024-06-15T12:30:00Z").unwrap();
        assert!(got > 0);
    }

    #[test]
    fn rejects_garbage_input() {
        assert!(normalize("not-a-time").is_err());
    }
}

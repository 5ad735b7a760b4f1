use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::error::{Result, SynthError};

/// Parses the ISO-8601 timestamps written by Playwright and k6.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SynthError::Parse(format!("invalid timestamp {input}: {e}")))
}

/// Adds a fractional millisecond duration, failing instead of overflowing.
pub fn add_millis(ts: DateTime<Utc>, ms: f64) -> Result<DateTime<Utc>> {
    let delta = millis_to_chrono(ms)?;
    ts.checked_add_signed(delta)
        .ok_or_else(|| SynthError::Timestamp(format!("{ts} + {ms}ms overflows")))
}

pub fn sub_millis(ts: DateTime<Utc>, ms: f64) -> Result<DateTime<Utc>> {
    let delta = millis_to_chrono(ms)?;
    ts.checked_sub_signed(delta)
        .ok_or_else(|| SynthError::Timestamp(format!("{ts} - {ms}ms underflows")))
}

pub fn to_system_time(ts: DateTime<Utc>) -> SystemTime {
    SystemTime::from(ts)
}

fn millis_to_chrono(ms: f64) -> Result<chrono::Duration> {
    if !ms.is_finite() || ms < 0.0 {
        return Err(SynthError::Timestamp(format!("invalid duration {ms}ms")));
    }
    let micros = (ms * 1000.0).round();
    if micros > i64::MAX as f64 {
        return Err(SynthError::Timestamp(format!("duration {ms}ms too large")));
    }
    let std = Duration::from_micros(micros as u64);
    chrono::Duration::from_std(std)
        .map_err(|e| SynthError::Timestamp(format!("duration {ms}ms: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_timestamp("2026-01-01T02:00:00.250+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-01T00:00:00.250+00:00");
    }

    #[test]
    fn rejects_invalid() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn adds_fractional_millis() {
        let ts = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        let later = add_millis(ts, 1.5).unwrap();
        assert_eq!((later - ts).num_microseconds(), Some(1500));
    }

    #[test]
    fn rejects_negative_and_overflowing_durations() {
        let ts = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        assert!(add_millis(ts, -1.0).is_err());
        assert!(add_millis(ts, f64::NAN).is_err());
        assert!(add_millis(ts, 1e300).is_err());
    }
}

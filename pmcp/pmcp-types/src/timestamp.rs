//! Tolerant timestamp parsing for alert replay cursors.
//!
//! Stored and client-supplied timestamps arrive in three shapes: naive
//! (`2024-05-01T12:00:00` with optional fraction), `Z`-suffixed, and
//! offset-aware (`+02:00`). All are normalized to UTC before comparison;
//! comparisons are never lexicographic.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Parse one of the three accepted shapes, normalized to UTC.
///
/// Returns `None` for anything unparseable; callers treat an unparseable
/// cursor as absent rather than as an error.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Canonical RFC 3339 rendering used for all engine-generated timestamps.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

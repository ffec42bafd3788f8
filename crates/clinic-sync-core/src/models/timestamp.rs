//! Timestamp text format shared by the local store and the sync engine.
//!
//! Stored form is RFC 3339 UTC with millisecond precision and a `Z` suffix,
//! fixed width, so SQLite text comparison matches chronological order.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Format a timestamp in the stored form.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse any RFC 3339 timestamp. Zone-less ISO-8601 text is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Re-render a timestamp in the stored form.
pub fn normalize_timestamp(s: &str) -> Option<String> {
    parse_timestamp(s).map(format_timestamp)
}

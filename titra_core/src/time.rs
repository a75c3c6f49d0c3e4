//! Timestamp construction and duration computation.
//!
//! Timestamps are stored as `YYYY-MM-DDTHH:MM:SS±HH:MM` strings carrying the
//! device's local offset at the instant of serialization, so a record written
//! during DST keeps its DST offset. Anything written by this module must
//! re-parse to the identical instant.

use crate::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveTime, TimeZone};

/// Stored timestamp format: ISO-8601 with an explicit `±HH:MM` offset.
pub const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

fn format_local(dt: DateTime<Local>) -> String {
    dt.format(LOCAL_FORMAT).to_string()
}

/// Capture the current instant, serialized with the local offset in effect
/// right now (not a fixed zone).
pub fn now_local_timestamp() -> String {
    format_local(Local::now())
}

/// Interpret plain date and wall-clock components in the current local zone
/// and serialize them like [`now_local_timestamp`].
///
/// An ambiguous local time (DST fold) resolves to the earliest mapping; a
/// nonexistent one (DST gap) is an error.
pub fn compose_local_timestamp(date: NaiveDate, time: NaiveTime) -> Result<String> {
    let naive = date.and_time(time);
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(format_local(dt)),
        LocalResult::Ambiguous(earliest, _) => Ok(format_local(earliest)),
        LocalResult::None => Err(Error::Time(format!(
            "{naive} does not exist in the local zone"
        ))),
    }
}

/// Parse a stored timestamp back to its instant. Tolerates RFC 3339 variants
/// (fractional seconds, `Z`) so imported data is accepted too.
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s.trim()).ok()
}

/// Minutes between two stored timestamps, rounded to the nearest minute.
///
/// Returns None if either side is missing or does not parse. A negative
/// result is surfaced as-is; the next-day rollover policy is applied by the
/// caller before the duration is computed.
pub fn duration_minutes(taken_at: Option<&str>, end_at: Option<&str>) -> Option<i64> {
    let start = parse_timestamp(taken_at?)?;
    let end = parse_timestamp(end_at?)?;
    let ms = end.signed_duration_since(start).num_milliseconds();
    Some((ms as f64 / 60_000.0).round() as i64)
}

/// Shift a stored timestamp forward by one day, re-serializing in the local
/// zone. Used when a user-supplied end time falls before the take time.
pub fn next_day(ts: &str) -> Option<String> {
    let dt = parse_timestamp(ts)?;
    Some(format_local((dt + Duration::hours(24)).with_timezone(&Local)))
}

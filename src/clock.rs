//! Wall-clock helpers. Match start times arrive and are stored as Beijing-local text
//! (`YYYY-MM-DD HH:MM:SS`, UTC+8); quote timestamps are stored as UTC epoch milliseconds.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BEIJING_OFFSET_SECS: i32 = 8 * 3_600;

/// Accepted start-time layouts in feeds and query parameters.
const PARSE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

pub fn beijing() -> FixedOffset {
    FixedOffset::east_opt(BEIJING_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn now_beijing() -> NaiveDateTime {
    Utc::now().with_timezone(&beijing()).naive_local()
}

pub fn now_beijing_string() -> String {
    now_beijing().format(TIME_FORMAT).to_string()
}

/// Formats an epoch-millisecond timestamp as Beijing-local text.
pub fn format_ms(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(t) => t.with_timezone(&beijing()).format(TIME_FORMAT).to_string(),
        None => String::new(),
    }
}

pub fn parse_beijing(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    PARSE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Re-renders a feed start time in the canonical layout. Unparsable input is rejected so that
/// match identities never depend on a source's formatting quirks.
pub fn normalize_start_time(raw: &str) -> Option<String> {
    parse_beijing(raw).map(|t| t.format(TIME_FORMAT).to_string())
}

/// Minutes from `now` until `start` (negative once the match has started).
pub fn minutes_until(start: &str, now: NaiveDateTime) -> Option<i64> {
    parse_beijing(start).map(|t| (t - now).num_minutes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_layouts() {
        assert_eq!(
            normalize_start_time("2025-03-01T19:30:00").as_deref(),
            Some("2025-03-01 19:30:00")
        );
        assert_eq!(
            normalize_start_time("2025-03-01 19:30").as_deref(),
            Some("2025-03-01 19:30:00")
        );
        assert_eq!(
            normalize_start_time("2025-03-01 19:30:00.250").as_deref(),
            Some("2025-03-01 19:30:00")
        );
        assert!(normalize_start_time("tomorrow").is_none());
    }

    #[test]
    fn formats_epoch_millis_in_beijing_time() {
        // 2024-01-01 00:00:00 UTC
        assert_eq!(format_ms(1_704_067_200_000), "2024-01-01 08:00:00");
    }

    #[test]
    fn minutes_until_is_signed() {
        let now = parse_beijing("2025-03-01 18:00:00").unwrap();
        assert_eq!(minutes_until("2025-03-01 19:30:00", now), Some(90));
        assert_eq!(minutes_until("2025-03-01 17:45:00", now), Some(-15));
    }
}

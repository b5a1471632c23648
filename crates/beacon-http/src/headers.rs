//! Cache header values

use chrono::{DateTime, Utc};

/// Cache-Control for content that never changes once served
pub const IMMUTABLE: &str = "public, max-age=604800, immutable";

/// Lifetime of immutable content
pub const IMMUTABLE_SECS: i64 = 7 * 24 * 60 * 60;

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format unix seconds as an HTTP date
pub fn http_date(unix_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .format(HTTP_DATE)
        .to_string()
}

/// Parse an HTTP date into unix seconds
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Unix time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `max-age` for the latest round, while the next one is still pending.
///
/// `None` when the next round is already due or further away than a period,
/// which means the schedule and the served round disagree.
pub fn latest_max_age(next_round_at: i64, now_ms: i64, period_secs: u64) -> Option<String> {
    let remaining_ms = next_round_at.saturating_mul(1000).saturating_sub(now_ms);
    let period_ms = i64::try_from(period_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    if remaining_ms <= 0 || remaining_ms >= period_ms {
        return None;
    }

    let seconds = remaining_ms.saturating_add(999) / 1000;
    Some(format!("max-age={}, public", seconds))
}

/// True when a cached copy from `if_modified_since` is still current
pub fn not_modified(if_modified_since: Option<&str>, last_modified: i64) -> bool {
    if_modified_since
        .and_then(parse_http_date)
        .map_or(false, |since| last_modified <= since)
}

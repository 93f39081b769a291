/// Utility helpers shared across collectors, storages and the scheduler.
///
/// This module contains:
/// - Time helpers
/// - Day-segment naming for partitioned storages
/// - Small url and cron format helpers
///
/// IMPORTANT:
/// - No component-specific logic should live here.
/// - Everything here must stay deterministic given its inputs.
///

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Days, NaiveDate, Utc};

/// Returns the current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Returns the current Unix timestamp in seconds.
pub fn now_secs() -> i64 {
    now_ms() / 1000
}

/// Calendar day (UTC) a unix timestamp falls in.
pub fn day_of(timestamp: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .date_naive()
}

/// Deterministic segment name for a day, e.g. `2026_10_19`.
pub fn segment_name(day: NaiveDate) -> String {
    day.format("%Y_%m_%d").to_string()
}

/// Every day from the day of `since` up to the day of `until`, inclusive.
///
/// Returns an empty list when `since` lies after `until`.
pub fn days_between(since: i64, until: i64) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let last = day_of(until);
    let mut current = day_of(since);
    while current <= last {
        days.push(current);
        match current.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}

/// Host part of a url, lowercased. `None` for unparseable urls.
pub fn url_host(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Normalize a cron expression for the job scheduler.
///
/// Configuration uses classic 5-field crontab syntax
/// (`min hour dom month dow`); the scheduler expects a leading
/// seconds field. 6 and 7 field expressions pass through untouched.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

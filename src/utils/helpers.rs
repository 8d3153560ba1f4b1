/// Helper utilities for the Consultify CLI

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format a millisecond timestamp as local date and time
pub fn format_timestamp_ms(timestamp_ms: i64) -> String {
    match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(dt) => {
            let local: DateTime<Local> = dt.into();
            local.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        None => "unknown".to_string(),
    }
}

/// Format a millisecond timestamp as a local date
pub fn format_date_ms(timestamp_ms: i64) -> String {
    match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(dt) => {
            let local: DateTime<Local> = dt.into();
            local.format("%Y-%m-%d").to_string()
        }
        None => "unknown".to_string(),
    }
}

/// Midnight (UTC) of the given date, in milliseconds
pub fn date_to_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight).timestamp_millis())
        .unwrap_or(0)
}

/// Truncate string with ellipsis, counting characters rather than bytes
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len).collect();
        format!("{}...", head)
    }
}

/// Short display form of a process or consultation id
pub fn short_id(id: &str) -> String {
    let head: String = id.chars().take(8).collect();
    format!("{}...", head)
}

/// Mask sensitive data (show only first and last N characters)
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= visible_chars * 2 {
        "*".repeat(chars.len())
    } else {
        let start: String = chars[..visible_chars].iter().collect();
        let end: String = chars[chars.len() - visible_chars..].iter().collect();
        format!("{}...{}", start, end)
    }
}

fn process_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{43}$").expect("static regex"))
}

/// Process and wallet ids are 32 bytes encoded as unpadded base64url
pub fn is_valid_process_id(id: &str) -> bool {
    process_id_regex().is_match(id)
}

/// Validate an http(s) URL (basic check)
pub fn is_valid_url(url: &str) -> bool {
    let rest = match url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    let host = rest.split(['/', '?']).next().unwrap_or("");
    !host.is_empty() && !host.contains(' ')
}

/// Token amounts must parse as a number greater than zero
pub fn parse_amount(amount: &str) -> Option<f64> {
    amount
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}

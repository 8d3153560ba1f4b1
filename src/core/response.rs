/// Reply parsing shared by every flow
///
/// Processes answer with a JSON object carrying an `error` field, a JSON
/// array, a bare number or free text. Each substring check used on that text
/// lives here so callers name the heuristic they rely on.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A reply carries something usable (the old `false` sentinel is treated as absent)
pub fn is_present(reply: &str) -> bool {
    let trimmed = reply.trim();
    !trimmed.is_empty() && trimmed != "false"
}

/// Free-text replies reporting a failure contain the word "error"
pub fn mentions_error(reply: &str) -> bool {
    reply.contains("error")
}

pub fn reports_success(reply: &str) -> bool {
    reply.contains("successfully")
}

pub fn reports_not_found(text: &str) -> bool {
    text.contains("not found")
}

pub fn parse_json(reply: &str) -> Option<Value> {
    serde_json::from_str(reply.trim()).ok()
}

/// `error` field of a JSON object, rendered as text
pub fn error_field(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `error` field of a reply that parses as a JSON object
pub fn json_error(reply: &str) -> Option<String> {
    parse_json(reply).as_ref().and_then(error_field)
}

/// Integer prefix of a string, the way `parseInt` reads it; 0 otherwise
pub fn lenient_i64(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    match digits[..end].parse::<i64>() {
        Ok(value) if negative => -value,
        Ok(value) => value,
        Err(_) => 0,
    }
}

/// Number carried either as a JSON number or as a numeric string
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => Some(lenient_i64(s)),
        _ => None,
    }
}

/// Deserialize a field the network sends as either a string or a number
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Deserialize an integer the network sends as either a number or a numeric string
pub fn number_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_as_i64(&Value::deserialize(deserializer)?).unwrap_or(0))
}

pub fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

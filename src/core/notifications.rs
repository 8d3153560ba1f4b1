/// User notifications from the orchestrator

use anyhow::{anyhow, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use super::config::NetworkConfig;
use super::response::{error_field, lenient_i64, parse_json, string_or_number};
use super::rpc::{MessageRequest, RpcClient};
use crate::utils::actions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: String,
}

impl Notification {
    pub fn timestamp_ms(&self) -> i64 {
        lenient_i64(&self.timestamp)
    }
}

/// Parse a notifications reply, newest first
///
/// An `error` field means there is nothing to show, not a failure.
pub fn parse_notifications(reply: &str) -> Result<Vec<Notification>> {
    let value = parse_json(reply).ok_or_else(|| anyhow!("Failed to parse notifications"))?;
    if error_field(&value).is_some() {
        return Ok(Vec::new());
    }
    let Value::Array(_) = value else {
        return Ok(Vec::new());
    };

    let mut notifications: Vec<Notification> =
        serde_json::from_value(value).map_err(|_| anyhow!("Failed to parse notifications"))?;
    notifications.sort_by(|a, b| b.timestamp_ms().cmp(&a.timestamp_ms()));
    Ok(notifications)
}

fn triage_summary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"The triage summary so far is: ").expect("static regex"))
}

/// Put the triage summary of a notification on its own paragraph
pub fn format_message(message: &str) -> String {
    triage_summary_regex()
        .replace(message, "\n\nTriage Summary: ")
        .into_owned()
}

pub struct NotificationManager {
    rpc: Arc<RpcClient>,
    network: NetworkConfig,
}

impl NotificationManager {
    pub fn new(rpc: Arc<RpcClient>, network: NetworkConfig) -> Self {
        Self { rpc, network }
    }

    pub async fn list(&self) -> Result<Vec<Notification>> {
        let request = MessageRequest::new(self.network.orchestrator()?)
            .action(actions::GET_USER_NOTIFICATIONS);
        let reply = self.rpc.dispatch(request).await.map_err(|e| {
            debug!(error = %e, "notifications lookup failed");
            anyhow!("Failed to fetch notifications")
        })?;
        parse_notifications(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sorted_newest_first() {
        let reply = r#"[
            {"message": "old", "timestamp": "1000"},
            {"message": "new", "timestamp": 3000},
            {"message": "mid", "timestamp": "2000"}
        ]"#;
        let messages: Vec<String> = parse_notifications(reply)
            .unwrap()
            .into_iter()
            .map(|n| n.message)
            .collect();
        assert_eq!(messages, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_error_reply_is_empty() {
        assert!(parse_notifications(r#"{"error":"No notifications found"}"#)
            .unwrap()
            .is_empty());
        assert!(parse_notifications(r#"{"count": 0}"#).unwrap().is_empty());
        assert!(parse_notifications("garbage").is_err());
    }

    #[test]
    fn test_format_message() {
        assert_eq!(
            format_message("Patient waiting. The triage summary so far is: fever"),
            "Patient waiting. \n\nTriage Summary: fever"
        );
        assert_eq!(format_message("Hello"), "Hello");
    }
}

/// Messenger/compute unit HTTP transport
///
/// Signed data items are posted to the messenger unit; results are read back
/// from the compute unit by message id.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::data_item::DataItem;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

/// One outbound message in a process result
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultMessage {
    #[serde(rename = "Data", default)]
    pub data: Option<Value>,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<Value>,
}

impl ResultMessage {
    /// Data as text: strings as-is, other JSON values serialized, null/missing as ""
    pub fn data_text(&self) -> String {
        match &self.data {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Compute unit result for a single message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcessResult {
    #[serde(rename = "Messages", default)]
    pub messages: Vec<ResultMessage>,
    #[serde(rename = "Error", default)]
    pub error: Option<Value>,
}

impl ProcessResult {
    /// Payload of the last message, if the result has any messages yet
    pub fn last_data(&self) -> Option<String> {
        self.messages.last().map(ResultMessage::data_text)
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit a signed item; returns the message id assigned by the unit
    async fn submit(&self, process: &str, item: &DataItem) -> Result<String, TransportError>;

    /// Fetch the current result of a message
    async fn result(&self, process: &str, message_id: &str) -> Result<ProcessResult, TransportError>;
}

pub struct HttpTransport {
    client: Client,
    mu_url: String,
    cu_url: String,
}

impl HttpTransport {
    pub fn new(mu_url: &str, cu_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            mu_url: mu_url.trim_end_matches('/').to_string(),
            cu_url: cu_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn mu_url(&self) -> &str {
        &self.mu_url
    }

    pub fn cu_url(&self) -> &str {
        &self.cu_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, process: &str, item: &DataItem) -> Result<String, TransportError> {
        let response = self
            .client
            .post(format!("{}/", self.mu_url))
            .header("Content-Type", "application/octet-stream")
            .header("Accept", "application/json")
            .body(item.to_bytes())
            .send()
            .await?;

        let response = Self::check(response).await?;
        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        tracing::debug!(process, message_id = %body.id, "message submitted");
        Ok(body.id)
    }

    async fn result(&self, process: &str, message_id: &str) -> Result<ProcessResult, TransportError> {
        let response = self
            .client
            .get(format!("{}/result/{}", self.cu_url, message_id))
            .query(&[("process-id", process)])
            .send()
            .await?;

        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_text() {
        let text = ResultMessage { data: Some(json!("hi")), tags: vec![] };
        assert_eq!(text.data_text(), "hi");

        let object = ResultMessage { data: Some(json!({"balance": "5"})), tags: vec![] };
        assert_eq!(object.data_text(), r#"{"balance":"5"}"#);

        assert_eq!(ResultMessage::default().data_text(), "");
        let null = ResultMessage { data: Some(Value::Null), tags: vec![] };
        assert_eq!(null.data_text(), "");
    }

    #[test]
    fn test_last_data_uses_last_message() {
        let result: ProcessResult = serde_json::from_value(json!({
            "Messages": [{"Data": "first"}, {"Data": "second", "Tags": []}],
            "Spawns": [],
            "Output": ""
        }))
        .unwrap();
        assert_eq!(result.last_data().as_deref(), Some("second"));
    }

    #[test]
    fn test_last_data_empty_result() {
        let result: ProcessResult = serde_json::from_value(json!({})).unwrap();
        assert_eq!(result.last_data(), None);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let transport = HttpTransport::new("http://localhost:4002/", "http://localhost:4004//").unwrap();
        assert_eq!(transport.mu_url(), "http://localhost:4002");
        assert_eq!(transport.cu_url(), "http://localhost:4004");
    }
}

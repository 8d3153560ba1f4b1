/// Doctor/patient chat over a consultation process
///
/// Messages sent locally show up at once as pending copies. A pending copy
/// stays until a poll returns a message with the same id, or is dropped if
/// the send fails.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::consultations::{ConsultationDetails, ConsultationManager};
use super::response::{error_field, lenient_i64, parse_json};
use super::rpc::{MessageRequest, RpcClient};
use super::session::{Role, UserMetadata};
use crate::utils::{actions, now_ms, tags};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default, deserialize_with = "super::response::string_or_number")]
    pub timestamp: String,
    #[serde(rename = "translatedContent", default)]
    pub translated_content: String,
    #[serde(rename = "translatedLanguage", default)]
    pub translated_language: String,
    #[serde(rename = "originalContent", default)]
    pub original_content: String,
    #[serde(rename = "originalLanguage", default)]
    pub original_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<String>,
}

impl ChatMessage {
    pub fn timestamp_ms(&self) -> i64 {
        lenient_i64(&self.timestamp)
    }

    /// Own messages read in the original; others in translation when there is one
    pub fn display_content(&self, viewer_address: &str) -> &str {
        if self.sender == viewer_address || self.translated_content.is_empty() {
            &self.original_content
        } else {
            &self.translated_content
        }
    }
}

/// Who a message is from, as shown next to it
pub fn sender_label(
    message: &ChatMessage,
    viewer: &UserMetadata,
    viewer_address: &str,
    details: Option<&ConsultationDetails>,
    triage_process: &str,
) -> String {
    if message.sender == viewer_address {
        return viewer.name.clone();
    }
    if !triage_process.is_empty() && message.sender == triage_process {
        return "Triage Agent".to_string();
    }
    if let Some(details) = details {
        if details.doctor_id.as_deref() == Some(message.sender.as_str()) {
            return match viewer.role {
                Some(Role::Patient) => "Dr. Assistant",
                _ => "Doctor",
            }
            .to_string();
        }
        if details.patient_id.as_deref() == Some(message.sender.as_str()) {
            return "Patient".to_string();
        }
    }
    "Other User".to_string()
}

/// Parse a `GetMessages` reply; `None` leaves the thread as it is
pub fn parse_messages_reply(reply: &str) -> Option<Vec<ChatMessage>> {
    let Some(value) = parse_json(reply) else {
        warn!("messages reply is not JSON");
        return None;
    };
    if let Some(error) = error_field(&value) {
        warn!(%error, "messages reply carries an error");
        return None;
    }
    match value {
        Value::Array(_) => match serde_json::from_value(value) {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!(error = %e, "messages reply has malformed entries");
                None
            }
        },
        other => {
            warn!(kind = ?other, "expected an array of messages");
            None
        }
    }
}

/// Local view of a conversation
#[derive(Debug, Clone, Default)]
pub struct ChatThread {
    messages: Vec<ChatMessage>,
    pending: HashSet<String>,
}

impl ChatThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.contains(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Append an optimistic copy of an outgoing message and return it
    pub fn begin_send(&mut self, sender: &str, content: &str, language: &str) -> ChatMessage {
        let now = now_ms();
        let message = ChatMessage {
            message_id: format!("{}{}", now, sender),
            sender: sender.to_string(),
            timestamp: now.to_string(),
            translated_content: content.to_string(),
            translated_language: language.to_string(),
            original_content: content.to_string(),
            original_language: language.to_string(),
            attestation: None,
        };
        self.pending.insert(message.message_id.clone());
        self.messages.push(message.clone());
        message
    }

    /// Drop a pending message whose send failed
    pub fn fail_send(&mut self, message_id: &str) {
        self.pending.remove(message_id);
        self.messages.retain(|m| m.message_id != message_id);
    }

    /// Merge a polled server list; returns whether the thread changed
    pub fn apply_poll(&mut self, server: Vec<ChatMessage>) -> bool {
        let server_ids: BTreeSet<&str> = server.iter().map(|m| m.message_id.as_str()).collect();

        let confirmed: Vec<String> = self
            .pending
            .iter()
            .filter(|id| server_ids.contains(id.as_str()))
            .cloned()
            .collect();

        let current_ids: BTreeSet<&str> = self
            .messages
            .iter()
            .filter(|m| !self.pending.contains(&m.message_id))
            .map(|m| m.message_id.as_str())
            .collect();

        if current_ids == server_ids && confirmed.is_empty() {
            return false;
        }

        for id in &confirmed {
            self.pending.remove(id);
        }

        let still_pending: Vec<ChatMessage> = self
            .messages
            .drain(..)
            .filter(|m| self.pending.contains(&m.message_id))
            .collect();

        let mut merged = server;
        merged.extend(still_pending);
        merged.sort_by_key(ChatMessage::timestamp_ms);
        self.messages = merged;
        true
    }
}

/// Live chat on one consultation
pub struct ChatSession {
    rpc: Arc<RpcClient>,
    consultation_id: String,
    viewer: UserMetadata,
    details: ConsultationDetails,
    thread: ChatThread,
}

impl ChatSession {
    /// Load the consultation details and the first page of messages
    pub async fn open(
        rpc: Arc<RpcClient>,
        consultations: &ConsultationManager,
        consultation_id: &str,
        viewer: UserMetadata,
    ) -> Result<Self> {
        let details = consultations.details(consultation_id).await?;
        let mut session = Self {
            rpc,
            consultation_id: consultation_id.to_string(),
            viewer,
            details,
            thread: ChatThread::new(),
        };
        session.refresh().await;
        Ok(session)
    }

    pub fn thread(&self) -> &ChatThread {
        &self.thread
    }

    pub fn details(&self) -> &ConsultationDetails {
        &self.details
    }

    pub fn viewer(&self) -> &UserMetadata {
        &self.viewer
    }

    pub fn address(&self) -> String {
        self.rpc.address()
    }

    fn role(&self) -> Role {
        self.viewer.role.unwrap_or(Role::Patient)
    }

    /// Poll the message list once; returns whether anything changed
    pub async fn refresh(&mut self) -> bool {
        let request = MessageRequest::new(self.consultation_id.clone()).action(actions::GET_MESSAGES);
        match self.rpc.dispatch(request).await {
            Ok(reply) if !reply.is_empty() => match parse_messages_reply(&reply) {
                Some(messages) => self.thread.apply_poll(messages),
                None => false,
            },
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "failed to fetch messages");
                false
            }
        }
    }

    /// Send a message; the pending copy is removed again on failure
    pub async fn send(&mut self, content: &str) -> Result<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(anyhow!("Message cannot be empty"));
        }

        let (source, target) = self.details.languages_for(self.role());
        let sender = self.address();
        let message = self.thread.begin_send(&sender, content, &source);

        let request = MessageRequest::new(self.consultation_id.clone())
            .action(actions::MESSAGE_RESPONSE)
            .tag(tags::MESSAGE_ID, message.message_id.clone())
            .tag(tags::CONSULTATION_ID, self.consultation_id.clone())
            .tag(tags::SENDER_ID, sender)
            .tag(tags::SOURCE_LANGUAGE, source)
            .tag(tags::TARGET_LANGUAGE, target)
            .data(content);

        match self.rpc.dispatch(request).await {
            Ok(_) => Ok(message),
            Err(e) => {
                self.thread.fail_send(&message.message_id);
                Err(anyhow!("Failed to send message: {}", e))
            }
        }
    }

    /// Refresh every `period` until cancelled, reporting each change
    pub async fn watch<F>(&mut self, period: Duration, cancel: CancellationToken, mut on_change: F)
    where
        F: FnMut(&ChatThread),
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let changed = tokio::select! {
                        _ = cancel.cancelled() => break,
                        changed = self.refresh() => changed,
                    };
                    if changed {
                        on_change(&self.thread);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consultations::ConsultationState;
    use crate::core::signer::WalletSigner;
    use crate::core::transport::{MockTransport, ProcessResult, ResultMessage, TransportError};
    use serde_json::json;

    const CONSULTATION: &str = "JArYBF-D8q2OmZ4Mok00sD2Y_6SYEQ7Hjx-6VZ_jl3g";

    fn session(transport: MockTransport) -> ChatSession {
        let rpc = RpcClient::new(Arc::new(transport), Arc::new(WalletSigner::from_seed(&[4u8; 32])));
        ChatSession {
            rpc: Arc::new(rpc),
            consultation_id: CONSULTATION.to_string(),
            viewer: UserMetadata {
                name: "Pat".to_string(),
                role: Some(Role::Patient),
                ..UserMetadata::default()
            },
            details: ConsultationDetails {
                patient_id: Some("pat-id".to_string()),
                doctor_id: Some("doc-id".to_string()),
                state: ConsultationState::Doctor,
                created_at: None,
                patient_language: Some("es".to_string()),
                doctor_language: None,
            },
            thread: ChatThread::new(),
        }
    }

    fn server_message(id: &str, sender: &str, timestamp: &str) -> ChatMessage {
        ChatMessage {
            message_id: id.to_string(),
            sender: sender.to_string(),
            timestamp: timestamp.to_string(),
            translated_content: format!("translated {}", id),
            translated_language: "en".to_string(),
            original_content: format!("original {}", id),
            original_language: "fr".to_string(),
            attestation: None,
        }
    }

    #[test]
    fn test_pending_removed_once_confirmed() {
        let mut thread = ChatThread::new();
        thread.apply_poll(vec![server_message("a", "doc", "1")]);

        let pending = thread.begin_send("me", "bonjour", "fr");
        assert!(thread.is_pending(&pending.message_id));
        assert_eq!(thread.messages().len(), 2);

        // Poll without the new message keeps the pending copy
        assert!(!thread.apply_poll(vec![server_message("a", "doc", "1")]));
        assert!(thread.is_pending(&pending.message_id));
        assert_eq!(thread.messages().len(), 2);

        let mut confirmed = pending.clone();
        confirmed.translated_content = "hello".to_string();
        assert!(thread.apply_poll(vec![server_message("a", "doc", "1"), confirmed]));

        assert_eq!(thread.pending_count(), 0);
        assert_eq!(thread.messages().len(), 2);
        assert_eq!(thread.messages()[1].translated_content, "hello");
    }

    #[test]
    fn test_failed_send_is_removed() {
        let mut thread = ChatThread::new();
        let pending = thread.begin_send("me", "hola", "es");
        thread.fail_send(&pending.message_id);

        assert!(thread.messages().is_empty());
        assert_eq!(thread.pending_count(), 0);
    }

    #[test]
    fn test_poll_sorts_by_numeric_timestamp() {
        let mut thread = ChatThread::new();
        thread.apply_poll(vec![
            server_message("late", "doc", "1000"),
            server_message("early", "pat", "999"),
            server_message("junk", "pat", "n/a"),
        ]);
        let ids: Vec<&str> = thread.messages().iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["junk", "early", "late"]);
    }

    #[test]
    fn test_unchanged_poll_reports_no_change() {
        let mut thread = ChatThread::new();
        assert!(thread.apply_poll(vec![server_message("a", "doc", "1")]));
        assert!(!thread.apply_poll(vec![server_message("a", "doc", "1")]));
        assert!(!ChatThread::new().apply_poll(Vec::new()));
    }

    #[test]
    fn test_parse_messages_reply() {
        let reply = r#"[{"message_id":"m1","sender":"s","timestamp":1700000000000,
            "translatedContent":"hi","translatedLanguage":"en",
            "originalContent":"salut","originalLanguage":"fr","attestation":"att"}]"#;
        let messages = parse_messages_reply(reply).unwrap();
        assert_eq!(messages[0].timestamp, "1700000000000");
        assert_eq!(messages[0].attestation.as_deref(), Some("att"));

        assert!(parse_messages_reply(r#"{"error":"Unauthorized"}"#).is_none());
        assert!(parse_messages_reply(r#"{"messages":[]}"#).is_none());
        assert!(parse_messages_reply("not json").is_none());
    }

    #[test]
    fn test_display_content() {
        let message = server_message("m", "doc", "1");
        assert_eq!(message.display_content("doc"), "original m");
        assert_eq!(message.display_content("pat"), "translated m");

        let untranslated = ChatMessage {
            translated_content: String::new(),
            ..message
        };
        assert_eq!(untranslated.display_content("pat"), "original m");
    }

    #[test]
    fn test_sender_label() {
        let viewer = UserMetadata {
            name: "Pat".to_string(),
            role: Some(Role::Patient),
            ..UserMetadata::default()
        };
        let details = ConsultationDetails {
            patient_id: Some("pat-id".to_string()),
            doctor_id: Some("doc-id".to_string()),
            state: ConsultationState::Doctor,
            created_at: None,
            patient_language: None,
            doctor_language: None,
        };
        let label = |sender: &str| {
            sender_label(&server_message("m", sender, "1"), &viewer, "my-addr", Some(&details), "triage")
        };

        assert_eq!(label("my-addr"), "Pat");
        assert_eq!(label("triage"), "Triage Agent");
        assert_eq!(label("doc-id"), "Dr. Assistant");
        assert_eq!(label("pat-id"), "Patient");
        assert_eq!(label("stranger"), "Other User");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_drops_pending_copy() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_, _| Err(TransportError::Decode("rejected".to_string())));
        transport.expect_result().never();

        let mut chat = session(transport);
        assert!(chat.send("hola").await.is_err());
        assert!(chat.thread().messages().is_empty());
        assert_eq!(chat.thread().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_tags_and_confirmation() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .withf(|_, item| item.tag("Action") == Some("Message-Response"))
            .times(1)
            .returning(|_, item| {
                assert_eq!(item.tag("SourceLanguage"), Some("es"));
                assert_eq!(item.tag("TargetLanguage"), Some("en"));
                assert_eq!(item.tag("ConsultationID"), Some(CONSULTATION));
                assert_eq!(item.data, b"hola".to_vec());
                Ok("send".to_string())
            });
        transport
            .expect_submit()
            .withf(|_, item| item.tag("Action") == Some("GetMessages"))
            .returning(|_, _| Ok("poll".to_string()));
        transport.expect_result().returning(|_, _| {
            Ok(ProcessResult {
                messages: vec![ResultMessage { data: Some(json!("ok")), tags: vec![] }],
                error: None,
            })
        });

        let mut chat = session(transport);
        let sent = chat.send("  hola ").await.unwrap();
        assert!(chat.thread().is_pending(&sent.message_id));
        assert!(sent.message_id.ends_with(&chat.address()));

        // "ok" is not a message list, so the thread keeps its pending copy
        assert!(!chat.refresh().await);
        assert!(chat.thread().is_pending(&sent.message_id));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let mut transport = MockTransport::new();
        transport.expect_submit().never();
        let mut chat = session(transport);
        assert!(chat.send("   ").await.is_err());
    }
}

/// Request/poll dispatch to network processes
///
/// A dispatch signs a tagged message, submits it to the messenger unit and
/// then polls the compute unit once per interval until the result carries a
/// message or the deadline passes.

use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::data_item::{DataItem, DataItemError, Tag};
use super::signer::Signer;
use super::transport::{Transport, TransportError};
use crate::utils::{tags, DEFAULT_POLL_INTERVAL, DEFAULT_RPC_TIMEOUT, PROTOCOL_TAGS};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to sign message: {0}")]
    Sign(#[from] DataItemError),
    #[error("failed to submit message: {0}")]
    Submit(#[from] TransportError),
    #[error("no result after {0:?}")]
    Timeout(Duration),
    #[error("dispatch cancelled")]
    Cancelled,
}

/// A message to one process
#[derive(Clone)]
pub struct MessageRequest {
    pub process: String,
    pub tags: Vec<Tag>,
    pub data: Option<String>,
    pub signer: Option<Arc<dyn Signer>>,
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for MessageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRequest")
            .field("process", &self.process)
            .field("tags", &self.tags)
            .field("data", &self.data)
            .field("signer", &self.signer.as_ref().map(|s| s.address()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MessageRequest {
    pub fn new(process: impl Into<String>) -> Self {
        Self {
            process: process.into(),
            tags: Vec::new(),
            data: None,
            signer: None,
            timeout: None,
        }
    }

    pub fn action(self, action: &str) -> Self {
        self.tag(tags::ACTION, action)
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct RpcClient {
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
    poll_interval: Duration,
    default_timeout: Duration,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, signer: Arc<dyn Signer>) -> Self {
        Self {
            transport,
            signer,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Address of the default signer
    pub fn address(&self) -> String {
        self.signer.address()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn dispatch(&self, request: MessageRequest) -> Result<String, RpcError> {
        self.dispatch_with_cancel(request, &CancellationToken::new()).await
    }

    /// Dispatch and wait for the reply; returns the last message's data
    pub async fn dispatch_with_cancel(
        &self,
        request: MessageRequest,
        cancel: &CancellationToken,
    ) -> Result<String, RpcError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;

        let item = self.build_item(&request)?;
        let item_id = item.id();
        debug!(process = %request.process, item = %item_id, tags = ?request.tags, "dispatching message");

        let message_id = tokio::select! {
            _ = cancel.cancelled() => return Err(RpcError::Cancelled),
            submitted = timeout_at(deadline, self.transport.submit(&request.process, &item)) => {
                match submitted {
                    Ok(Ok(id)) => id,
                    Ok(Err(e)) => {
                        warn!(process = %request.process, error = %e, "message submission failed");
                        return Err(RpcError::Submit(e));
                    }
                    Err(_) => return Err(RpcError::Timeout(timeout)),
                }
            }
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            // The poll at the deadline is the last one and gets its own interval-long bound.
            let final_poll = Instant::now() >= deadline;
            let poll_deadline = if final_poll {
                Instant::now() + self.poll_interval
            } else {
                deadline
            };

            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err(RpcError::Cancelled),
                polled = timeout_at(poll_deadline, self.transport.result(&request.process, &message_id)) => polled,
            };

            match polled {
                Ok(Ok(result)) => {
                    if let Some(data) = result.last_data() {
                        debug!(message = %message_id, attempts = attempt, "result received");
                        return Ok(data);
                    }
                    debug!(message = %message_id, attempt, "no messages yet");
                }
                Ok(Err(e)) => {
                    debug!(message = %message_id, attempt, error = %e, "poll failed, retrying");
                }
                Err(_) => {
                    debug!(message = %message_id, attempt, "poll did not answer in time");
                }
            }

            if final_poll {
                debug!(message = %message_id, attempts = attempt, "dispatch timed out");
                return Err(RpcError::Timeout(timeout));
            }

            let wake = (Instant::now() + self.poll_interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => return Err(RpcError::Cancelled),
                _ = sleep_until(wake) => {}
            }
        }
    }

    fn build_item(&self, request: &MessageRequest) -> Result<DataItem, DataItemError> {
        let signer = request.signer.as_ref().unwrap_or(&self.signer);

        let mut item_tags: Vec<Tag> = PROTOCOL_TAGS
            .iter()
            .map(|(name, value)| Tag::new(*name, *value))
            .collect();
        item_tags.extend(request.tags.iter().cloned());

        let mut anchor = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut anchor);

        let data = request.data.clone().unwrap_or_default().into_bytes();

        DataItem::sign(
            signer.as_ref(),
            Some(&request.process),
            Some(anchor),
            item_tags,
            data,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signer::WalletSigner;
    use crate::core::transport::{MockTransport, ProcessResult, ResultMessage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PROCESS: &str = "JArYBF-D8q2OmZ4Mok00sD2Y_6SYEQ7Hjx-6VZ_jl3g";

    fn result_with(data: &[&str]) -> ProcessResult {
        ProcessResult {
            messages: data
                .iter()
                .map(|d| ResultMessage { data: Some(json!(d)), tags: vec![] })
                .collect(),
            error: None,
        }
    }

    fn client(transport: MockTransport) -> RpcClient {
        RpcClient::new(Arc::new(transport), Arc::new(WalletSigner::from_seed(&[3u8; 32])))
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_result() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();

        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .times(1)
            .returning(|_, _| Ok("msg-1".to_string()));
        transport.expect_result().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessResult::default())
        });

        let rpc = client(transport).with_default_timeout(Duration::from_secs(10));
        let err = rpc
            .dispatch(MessageRequest::new(PROCESS).action("GetMessages"))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_secs(10)));
        let polls = polls.load(Ordering::SeqCst);
        assert!((10..=11).contains(&polls), "unexpected poll count {}", polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_shorter_than_interval_still_polls() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_, _| Ok("msg-1".to_string()));
        transport
            .expect_result()
            .times(1)
            .returning(|_, _| Ok(result_with(&["ready"])));

        let data = client(transport)
            .dispatch(
                MessageRequest::new(PROCESS)
                    .action("GetMessages")
                    .timeout(Duration::from_millis(500)),
            )
            .await
            .unwrap();
        assert_eq!(data, "ready");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_once_more_at_deadline() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();

        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_, _| Ok("msg-1".to_string()));
        transport.expect_result().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ProcessResult::default())
            } else {
                Ok(result_with(&["late"]))
            }
        });

        let started = Instant::now();
        let data = client(transport)
            .dispatch(MessageRequest::new(PROCESS).timeout(Duration::from_millis(500)))
            .await
            .unwrap();

        assert_eq!(data, "late");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_data_once_available() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();

        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_, _| Ok("msg-1".to_string()));
        transport
            .expect_result()
            .withf(|process, id| process.to_string() == PROCESS && id.to_string() == "msg-1")
            .returning(move |_, _| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(ProcessResult::default())
                } else {
                    Ok(result_with(&["ready"]))
                }
            });

        let data = client(transport)
            .dispatch(MessageRequest::new(PROCESS).action("GetMessages"))
            .await
            .unwrap();

        assert_eq!(data, "ready");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uses_last_message_and_empty_data() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_, _| Ok("msg-1".to_string()));
        transport
            .expect_result()
            .times(1)
            .returning(|_, _| Ok(result_with(&["first", "second"])));

        let data = client(transport).dispatch(MessageRequest::new(PROCESS)).await.unwrap();
        assert_eq!(data, "second");

        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_, _| Ok("msg-2".to_string()));
        transport.expect_result().returning(|_, _| {
            Ok(ProcessResult {
                messages: vec![ResultMessage::default()],
                error: None,
            })
        });

        let data = client(transport).dispatch(MessageRequest::new(PROCESS)).await.unwrap();
        assert_eq!(data, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_failure_is_reported() {
        let mut transport = MockTransport::new();
        transport.expect_submit().returning(|_, _| {
            Err(TransportError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            })
        });
        transport.expect_result().never();

        let err = client(transport)
            .dispatch(MessageRequest::new(PROCESS))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Submit(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_retried() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();

        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_, _| Ok("msg-1".to_string()));
        transport.expect_result().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TransportError::Decode("not json".to_string()))
            } else {
                Ok(result_with(&["ok"]))
            }
        });

        let data = client(transport).dispatch(MessageRequest::new(PROCESS)).await.unwrap();
        assert_eq!(data, "ok");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .returning(|_, _| Ok("msg-1".to_string()));
        transport
            .expect_result()
            .returning(|_, _| Ok(ProcessResult::default()));

        let rpc = client(transport);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3_500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = rpc
            .dispatch_with_cancel(MessageRequest::new(PROCESS), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_signer_overrides_default() {
        let override_signer = Arc::new(WalletSigner::from_seed(&[8u8; 32]));
        let expected_owner = override_signer.owner();

        let mut transport = MockTransport::new();
        transport
            .expect_submit()
            .withf(move |process, item| {
                process.to_string() == PROCESS
                    && item.owner == expected_owner
                    && item.tag("Action") == Some("Balance")
                    && item.tag("Data-Protocol") == Some("ao")
                    && item.target_id().as_deref() == Some(PROCESS)
            })
            .returning(|_, _| Ok("msg-1".to_string()));
        transport
            .expect_result()
            .returning(|_, _| Ok(result_with(&["42"])));

        let data = client(transport)
            .dispatch(
                MessageRequest::new(PROCESS)
                    .action("Balance")
                    .signer(override_signer),
            )
            .await
            .unwrap();
        assert_eq!(data, "42");
    }

    #[tokio::test]
    async fn test_invalid_process_fails_before_submit() {
        let mut transport = MockTransport::new();
        transport.expect_submit().never();

        let err = client(transport)
            .dispatch(MessageRequest::new("not-a-process"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Sign(_)));
    }
}

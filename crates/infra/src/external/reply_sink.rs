//! Reply sink: posts generated replies back into the conversation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

use parley_core::{ConversationId, TenantId};

pub const CHATWOOT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("reply request failed: {0}")]
    Request(String),

    #[error("reply rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("reply sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(
        &self,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        text: &str,
        private: bool,
    ) -> Result<(), ReplyError>;
}

#[async_trait]
impl<S> ReplySink for Arc<S>
where
    S: ReplySink + ?Sized,
{
    async fn deliver(
        &self,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        text: &str,
        private: bool,
    ) -> Result<(), ReplyError> {
        (**self).deliver(tenant_id, conversation_id, text, private).await
    }
}

#[derive(Debug, Serialize)]
struct OutgoingMessage<'a> {
    content: &'a str,
    message_type: &'static str,
    private: bool,
}

/// Chatwoot REST client for posting messages.
#[derive(Debug, Clone)]
pub struct ChatwootReplySink {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl ChatwootReplySink {
    pub fn new(base_url: impl AsRef<str>, api_token: Option<String>) -> Result<Self, ReplyError> {
        let client = reqwest::Client::builder()
            .timeout(CHATWOOT_TIMEOUT)
            .build()
            .map_err(|e| ReplyError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn messages_url(&self, tenant_id: TenantId, conversation_id: ConversationId) -> String {
        format!(
            "{}/api/v1/accounts/{}/conversations/{}/messages",
            self.base_url, tenant_id, conversation_id
        )
    }
}

#[async_trait]
impl ReplySink for ChatwootReplySink {
    #[instrument(skip_all, fields(tenant_id = %tenant_id, conversation_id = %conversation_id, private), err)]
    async fn deliver(
        &self,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        text: &str,
        private: bool,
    ) -> Result<(), ReplyError> {
        let mut request = self
            .client
            .post(self.messages_url(tenant_id, conversation_id))
            .json(&OutgoingMessage {
                content: text,
                message_type: "outgoing",
                private,
            });
        if let Some(token) = &self.api_token {
            request = request.header("api_access_token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReplyError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReplyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(private, "reply posted");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    pub tenant_id: TenantId,
    pub conversation_id: ConversationId,
    pub text: String,
    pub private: bool,
}

/// Records replies in memory. Can be told to fail a number of upcoming calls.
#[derive(Debug, Default)]
pub struct InMemoryReplySink {
    sent: Mutex<Vec<SentReply>>,
    failures_left: AtomicUsize,
}

impl InMemoryReplySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentReply> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReplySink for InMemoryReplySink {
    async fn deliver(
        &self,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        text: &str,
        private: bool,
    ) -> Result<(), ReplyError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ReplyError::Unavailable("injected failure".into()));
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ReplyError::Unavailable("lock poisoned".into()))?;
        sent.push(SentReply {
            tenant_id,
            conversation_id,
            text: text.to_string(),
            private,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_chatwoot_messages_url() {
        let sink = ChatwootReplySink::new("http://chat.local/", None).unwrap();
        assert_eq!(
            sink.messages_url(TenantId::new(3), ConversationId::new(15)),
            "http://chat.local/api/v1/accounts/3/conversations/15/messages"
        );
    }

    #[test]
    fn outgoing_payload_shape() {
        let body = serde_json::to_value(OutgoingMessage {
            content: "hello",
            message_type: "outgoing",
            private: true,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "content": "hello", "message_type": "outgoing", "private": true })
        );
    }

    #[tokio::test]
    async fn unreachable_platform_is_a_request_error() {
        let sink = ChatwootReplySink::new("http://127.0.0.1:1", Some("t".into())).unwrap();
        let err = sink
            .deliver(TenantId::new(1), ConversationId::new(1), "hi", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplyError::Request(_)));
    }

    #[tokio::test]
    async fn in_memory_sink_fails_then_records() {
        let sink = InMemoryReplySink::new();
        sink.fail_next(1);

        assert!(sink
            .deliver(TenantId::new(1), ConversationId::new(2), "a", false)
            .await
            .is_err());
        sink.deliver(TenantId::new(1), ConversationId::new(2), "b", true)
            .await
            .unwrap();

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "b");
        assert!(sent[0].private);
    }
}

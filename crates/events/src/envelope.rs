use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use parley_core::{
    ConversationId, CorrelationId, InboxId, MessageKind, RawEvent, SenderKind, TenantId,
};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("envelope deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// What the worker does with a generated reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Post the reply to the conversation.
    #[default]
    AutoRespond,
    /// Post the reply as a private note for a human agent.
    AssistAgent,
    /// Generate but do not post.
    ManualTrigger,
    #[serde(other)]
    Unknown,
}

impl ResponseMode {
    pub fn parse(value: &str) -> Self {
        match value {
            "auto_respond" => Self::AutoRespond,
            "assist_agent" => Self::AssistAgent,
            "manual_trigger" => Self::ManualTrigger,
            _ => Self::Unknown,
        }
    }

    /// Whether the reply is posted, and if so whether as a private note.
    pub fn delivery(&self) -> Option<bool> {
        match self {
            Self::AutoRespond => Some(false),
            Self::AssistAgent => Some(true),
            Self::ManualTrigger | Self::Unknown => None,
        }
    }
}

/// Agent bot settings attached to the inbound event.
///
/// Passed through to the processing function; the pipeline itself only reads
/// `response_mode`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub context_prompt: Option<String>,
    #[serde(default)]
    pub ai_agent_type: Option<String>,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default)]
    pub bot_config: Option<JsonValue>,
    #[serde(default)]
    pub outgoing_url: Option<String>,
}

impl AgentConfig {
    /// Total extraction: fields that are missing or of an unexpected type take
    /// their default.
    pub fn from_value(value: &JsonValue) -> Self {
        let str_field = |key: &str| value.get(key).and_then(JsonValue::as_str).map(str::to_string);

        Self {
            agent_id: value.get("agent_id").and_then(JsonValue::as_i64),
            agent_name: str_field("agent_name").unwrap_or_default(),
            context_prompt: str_field("context_prompt"),
            ai_agent_type: str_field("ai_agent_type"),
            response_mode: value
                .get("response_mode")
                .and_then(JsonValue::as_str)
                .map(ResponseMode::parse)
                .unwrap_or_default(),
            bot_config: value.get("bot_config").filter(|v| v.is_object()).cloned(),
            outgoing_url: str_field("outgoing_url"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub kind: SenderKind,
    #[serde(default)]
    pub name: Option<String>,
}

/// The unit of work that crosses the broker.
///
/// Notes:
/// - `correlation_id` is the source event's own id and never changes across retries.
/// - `attempt_count` is the only field that changes after construction, and only
///   through [`TaskEnvelope::record_failed_attempt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    correlation_id: CorrelationId,
    tenant_id: TenantId,
    conversation_id: ConversationId,
    inbox_id: InboxId,

    content: String,
    message_kind: MessageKind,

    #[serde(default)]
    sender: Option<Sender>,
    #[serde(default)]
    agent_config: Option<AgentConfig>,

    created_at: DateTime<Utc>,

    #[serde(default)]
    attempt_count: u32,

    #[serde(default)]
    raw: JsonValue,
}

impl TaskEnvelope {
    pub fn new(
        correlation_id: CorrelationId,
        tenant_id: TenantId,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            tenant_id,
            conversation_id,
            inbox_id: InboxId::default(),
            content: content.into(),
            message_kind: MessageKind::Incoming,
            sender: None,
            agent_config: None,
            created_at: Utc::now(),
            attempt_count: 0,
            raw: JsonValue::Null,
        }
    }

    /// Build a fresh envelope (attempt 0) from an accepted event.
    pub fn from_raw(event: &RawEvent, correlation_id: CorrelationId) -> Self {
        let sender = event.sender.as_ref().map(|s| Sender {
            id: s.id,
            kind: s.kind(),
            name: s.name.clone(),
        });

        Self {
            correlation_id,
            tenant_id: TenantId::new(event.tenant_ref()),
            conversation_id: ConversationId::new(event.conversation_ref()),
            inbox_id: InboxId::new(event.inbox_ref()),
            content: event.content().to_string(),
            message_kind: event.message_kind(),
            sender,
            agent_config: event.agent_bot().map(AgentConfig::from_value),
            created_at: Utc::now(),
            attempt_count: 0,
            raw: event.raw.clone(),
        }
    }

    pub fn with_agent_config(mut self, config: AgentConfig) -> Self {
        self.agent_config = Some(config);
        self
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn inbox_id(&self) -> InboxId {
        self.inbox_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn message_kind(&self) -> MessageKind {
        self.message_kind
    }

    pub fn sender(&self) -> Option<&Sender> {
        self.sender.as_ref()
    }

    pub fn agent_config(&self) -> Option<&AgentConfig> {
        self.agent_config.as_ref()
    }

    pub fn response_mode(&self) -> ResponseMode {
        self.agent_config
            .as_ref()
            .map(|c| c.response_mode)
            .unwrap_or_default()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn raw(&self) -> &JsonValue {
        &self.raw
    }

    /// Count one more failed attempt and return the new total.
    pub fn record_failed_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Serialize)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(EnvelopeError::Deserialize)
    }
}

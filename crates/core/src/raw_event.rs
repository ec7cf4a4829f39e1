//! Typed view of an inbound webhook event.
//!
//! Every field is optional with a named default so that missing subfields
//! never abort extraction.
//!
//! The fields the filter decides on (`event`, `id`, `content`, `private`,
//! `message_type`) are strict: a wrong JSON type rejects the body. Descriptive
//! subfields (`sender.*` and the `account`/`conversation`/`inbox` ids) are
//! lenient: ids given as numeric strings are parsed, and anything else of the
//! wrong type decodes as absent.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::error::{EventError, EventResult};
use crate::id::CorrelationId;
use crate::message::{MessageKind, SenderKind};

/// Platform message id; webhooks send it as a number, replays sometimes as a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    pub fn to_correlation_id(&self) -> Option<CorrelationId> {
        match self {
            RawId::Number(n) => CorrelationId::new(n.to_string()).ok(),
            RawId::Text(s) => CorrelationId::new(s.as_str()).ok(),
        }
    }
}

/// `message_type` as either the numeric code or the symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawMessageType {
    Code(i64),
    Name(String),
}

impl RawMessageType {
    /// Unknown codes/names are treated as incoming.
    pub fn kind(&self) -> MessageKind {
        let known = match self {
            RawMessageType::Code(code) => MessageKind::from_code(*code),
            RawMessageType::Name(name) => MessageKind::from_name(name),
        };
        known.unwrap_or(MessageKind::Incoming)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawSender {
    #[serde(default, deserialize_with = "lenient::id")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub email: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient::value")]
    pub sender_type: Option<String>,
}

impl RawSender {
    pub fn kind(&self) -> SenderKind {
        self.sender_type
            .as_deref()
            .map(SenderKind::from_platform_type)
            .unwrap_or_default()
    }
}

/// Reference to a platform object (`account`, `conversation`, `inbox`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawRef {
    #[serde(default, deserialize_with = "lenient::id")]
    pub id: Option<i64>,
}

mod lenient {
    use super::*;

    /// `T` if the value has the right shape, otherwise absent.
    pub fn value<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).ok())
    }

    /// Integer id, accepting `42` and `"42"`.
    pub fn id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match JsonValue::deserialize(deserializer)? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

/// Inbound event as posted by the chat platform.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: Option<RawMessageType>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub sender: Option<RawSender>,
    #[serde(default)]
    pub agent_bot: Option<JsonValue>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub account: Option<RawRef>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub conversation: Option<RawRef>,
    #[serde(default, deserialize_with = "lenient::value")]
    pub inbox: Option<RawRef>,

    /// The untouched payload, kept for passthrough.
    #[serde(skip)]
    pub raw: JsonValue,
}

impl RawEvent {
    /// Decode a JSON body. The body must be an object.
    pub fn from_value(value: JsonValue) -> EventResult<Self> {
        if !value.is_object() {
            return Err(EventError::malformed("event body must be a JSON object"));
        }

        let mut event: RawEvent = serde_json::from_value(value.clone())
            .map_err(|e| EventError::malformed(e.to_string()))?;
        event.raw = value;
        Ok(event)
    }

    pub fn from_slice(bytes: &[u8]) -> EventResult<Self> {
        let value: JsonValue =
            serde_json::from_slice(bytes).map_err(|e| EventError::malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.id.as_ref().and_then(RawId::to_correlation_id)
    }

    pub fn is_private(&self) -> bool {
        self.private.unwrap_or(false)
    }

    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn message_kind(&self) -> MessageKind {
        self.message_type
            .as_ref()
            .map(RawMessageType::kind)
            .unwrap_or_default()
    }

    /// Raw sender `type` string, if any.
    pub fn sender_type(&self) -> Option<&str> {
        self.sender.as_ref().and_then(|s| s.sender_type.as_deref())
    }

    /// The agent bot block counts as present only when it carries data:
    /// `null`, `false`, `""`, `0`, `[]` and `{}` all mean "not configured".
    pub fn agent_bot(&self) -> Option<&JsonValue> {
        self.agent_bot.as_ref().filter(|v| is_present(v))
    }

    pub fn tenant_ref(&self) -> i64 {
        ref_id(self.account.as_ref())
    }

    pub fn conversation_ref(&self) -> i64 {
        ref_id(self.conversation.as_ref())
    }

    pub fn inbox_ref(&self) -> i64 {
        ref_id(self.inbox.as_ref())
    }
}

fn ref_id(r: Option<&RawRef>) -> i64 {
    r.and_then(|r| r.id).unwrap_or(0)
}

fn is_present(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_numeric_and_string_message_types() {
        let numeric = RawEvent::from_value(json!({ "message_type": 1 })).unwrap();
        assert_eq!(numeric.message_kind(), MessageKind::Outgoing);

        let named = RawEvent::from_value(json!({ "message_type": "activity" })).unwrap();
        assert_eq!(named.message_kind(), MessageKind::Activity);

        let unknown = RawEvent::from_value(json!({ "message_type": 99 })).unwrap();
        assert_eq!(unknown.message_kind(), MessageKind::Incoming);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let ev = RawEvent::from_value(json!({})).unwrap();
        assert_eq!(ev.content(), "");
        assert!(!ev.is_private());
        assert_eq!(ev.tenant_ref(), 0);
        assert_eq!(ev.conversation_ref(), 0);
        assert!(ev.correlation_id().is_none());
        assert!(ev.agent_bot().is_none());
    }

    #[test]
    fn null_fields_take_defaults() {
        let ev = RawEvent::from_value(json!({
            "content": null,
            "private": null,
            "sender": null,
            "account": { "id": null }
        }))
        .unwrap();
        assert_eq!(ev.content(), "");
        assert!(!ev.is_private());
        assert!(ev.sender.is_none());
        assert_eq!(ev.tenant_ref(), 0);
    }

    #[test]
    fn wrong_types_in_deciding_fields_are_rejected() {
        assert!(RawEvent::from_value(json!({ "content": 12 })).is_err());
        assert!(RawEvent::from_value(json!({ "private": "yes" })).is_err());
        assert!(RawEvent::from_value(json!({ "event": 5 })).is_err());
        assert!(RawEvent::from_value(json!({ "id": [1] })).is_err());
        assert!(RawEvent::from_value(json!(["not", "an", "object"])).is_err());
        assert!(RawEvent::from_value(json!("message_created")).is_err());
    }

    #[test]
    fn numeric_string_refs_are_parsed() {
        let ev = RawEvent::from_value(json!({
            "account": { "id": "4" },
            "conversation": { "id": " 8 " },
            "inbox": { "id": 2 },
            "sender": { "id": "3", "type": "contact" }
        }))
        .unwrap();
        assert_eq!(ev.tenant_ref(), 4);
        assert_eq!(ev.conversation_ref(), 8);
        assert_eq!(ev.inbox.as_ref().and_then(|i| i.id), Some(2));
        assert_eq!(ev.sender.as_ref().and_then(|s| s.id), Some(3));
    }

    #[test]
    fn wrong_typed_subfields_decode_as_absent() {
        let ev = RawEvent::from_value(json!({
            "content": "hi",
            "account": { "id": "acme" },
            "conversation": { "id": true },
            "inbox": "main",
            "sender": { "id": {}, "name": 7, "email": ["a@b"], "type": 1 }
        }))
        .unwrap();
        assert_eq!(ev.content(), "hi");
        assert_eq!(ev.tenant_ref(), 0);
        assert_eq!(ev.conversation_ref(), 0);
        assert!(ev.inbox.is_none());
        assert_eq!(ev.sender, Some(RawSender::default()));

        let ev = RawEvent::from_value(json!({ "sender": "bot", "account": 4 })).unwrap();
        assert!(ev.sender.is_none());
        assert!(ev.account.is_none());
    }

    #[test]
    fn correlation_id_from_number_or_string() {
        let n = RawEvent::from_value(json!({ "id": 42 })).unwrap();
        assert_eq!(n.correlation_id().unwrap().as_str(), "42");

        let s = RawEvent::from_value(json!({ "id": "42" })).unwrap();
        assert_eq!(s.correlation_id().unwrap().as_str(), "42");

        let blank = RawEvent::from_value(json!({ "id": "" })).unwrap();
        assert!(blank.correlation_id().is_none());
    }

    #[test]
    fn empty_agent_bot_counts_as_absent() {
        let ev = RawEvent::from_value(json!({ "agent_bot": {} })).unwrap();
        assert!(ev.agent_bot().is_none());

        let ev = RawEvent::from_value(json!({ "agent_bot": { "agent_id": 1 } })).unwrap();
        assert!(ev.agent_bot().is_some());
    }

    #[test]
    fn raw_payload_is_preserved() {
        let body = json!({ "id": 7, "extra": { "nested": true } });
        let ev = RawEvent::from_value(body.clone()).unwrap();
        assert_eq!(ev.raw, body);
    }
}

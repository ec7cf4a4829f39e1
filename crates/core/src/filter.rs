//! Ingestion filter: decides whether an inbound event becomes a task.
//!
//! The decision is a pure function of the event and the filter's static
//! configuration. Rules are evaluated in a fixed order and the first failing
//! rule wins.

use serde::{Deserialize, Serialize};

use crate::message::MessageKind;
use crate::raw_event::RawEvent;

pub const MESSAGE_CREATED: &str = "message_created";

/// Why an event was not turned into a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rejection {
    EventNotAllowed { event: String },
    PrivateNote,
    EmptyContent,
    OutgoingMessage,
    ActivityMessage,
    BotSender { sender_type: String },
    NoAgentBot,
}

impl core::fmt::Display for Rejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Rejection::EventNotAllowed { event } => write!(f, "event type '{event}' not processed"),
            Rejection::PrivateNote => f.write_str("private message"),
            Rejection::EmptyContent => f.write_str("empty content"),
            Rejection::OutgoingMessage => f.write_str("outgoing message"),
            Rejection::ActivityMessage => f.write_str("activity message"),
            Rejection::BotSender { sender_type } => {
                write!(f, "message from bot sender '{sender_type}'")
            }
            Rejection::NoAgentBot => f.write_str("no agent bot configured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(Rejection),
}

impl FilterDecision {
    pub fn accepted(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }

    /// Human-readable reason; empty for accepted events.
    pub fn reason(&self) -> String {
        match self {
            FilterDecision::Accept => String::new(),
            FilterDecision::Reject(r) => r.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionFilter {
    allowed_events: Vec<String>,
    bot_sender_types: Vec<String>,
}

impl Default for IngestionFilter {
    fn default() -> Self {
        Self {
            allowed_events: vec![MESSAGE_CREATED.to_string()],
            bot_sender_types: vec!["AgentBot".to_string(), "agent_bot".to_string()],
        }
    }
}

impl IngestionFilter {
    pub fn with_bot_sender_types(mut self, types: Vec<String>) -> Self {
        self.bot_sender_types = types;
        self
    }

    pub fn decide(&self, event: &RawEvent) -> FilterDecision {
        match self.first_rejection(event) {
            Some(rejection) => FilterDecision::Reject(rejection),
            None => FilterDecision::Accept,
        }
    }

    fn first_rejection(&self, event: &RawEvent) -> Option<Rejection> {
        let event_type = event.event.as_deref().unwrap_or("");
        if !self.allowed_events.iter().any(|e| e == event_type) {
            return Some(Rejection::EventNotAllowed {
                event: event_type.to_string(),
            });
        }

        if event.is_private() {
            return Some(Rejection::PrivateNote);
        }

        if event.content().trim().is_empty() {
            return Some(Rejection::EmptyContent);
        }

        match event.message_kind() {
            MessageKind::Outgoing => return Some(Rejection::OutgoingMessage),
            MessageKind::Activity => return Some(Rejection::ActivityMessage),
            MessageKind::Incoming | MessageKind::Template => {}
        }

        if let Some(sender_type) = event.sender_type() {
            if self.bot_sender_types.iter().any(|t| t == sender_type) {
                return Some(Rejection::BotSender {
                    sender_type: sender_type.to_string(),
                });
            }
        }

        if event.agent_bot().is_none() {
            return Some(Rejection::NoAgentBot);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn passing() -> Value {
        json!({
            "event": "message_created",
            "id": 42,
            "private": false,
            "content": "hi",
            "message_type": 0,
            "sender": { "id": 3, "name": "Ana", "type": "contact" },
            "agent_bot": { "agent_id": 1 },
            "account": { "id": 1 },
            "conversation": { "id": 9 }
        })
    }

    fn with(patch: Value) -> RawEvent {
        let mut body = passing();
        if let (Some(obj), Some(p)) = (body.as_object_mut(), patch.as_object()) {
            for (k, v) in p {
                obj.insert(k.clone(), v.clone());
            }
        }
        RawEvent::from_value(body).unwrap()
    }

    fn decide(ev: &RawEvent) -> FilterDecision {
        IngestionFilter::default().decide(ev)
    }

    #[test]
    fn accepts_inbound_user_message() {
        let d = decide(&with(json!({})));
        assert!(d.accepted());
        assert_eq!(d.reason(), "");
    }

    #[test]
    fn rejects_other_event_types() {
        let d = decide(&with(json!({ "event": "conversation_updated" })));
        assert_eq!(
            d,
            FilterDecision::Reject(Rejection::EventNotAllowed {
                event: "conversation_updated".into()
            })
        );

        let missing = RawEvent::from_value(json!({ "content": "hi" })).unwrap();
        assert!(!decide(&missing).accepted());
    }

    #[test]
    fn rejects_private_notes() {
        let d = decide(&with(json!({ "private": true })));
        assert_eq!(d, FilterDecision::Reject(Rejection::PrivateNote));
    }

    #[test]
    fn rejects_blank_content() {
        for content in [json!(""), json!("   \n\t"), Value::Null] {
            let d = decide(&with(json!({ "content": content })));
            assert_eq!(d, FilterDecision::Reject(Rejection::EmptyContent));
        }
    }

    #[test]
    fn rejects_outgoing_and_activity_by_code_or_name() {
        for mt in [json!(1), json!("outgoing")] {
            let d = decide(&with(json!({ "message_type": mt })));
            assert_eq!(d, FilterDecision::Reject(Rejection::OutgoingMessage));
        }
        for mt in [json!(2), json!("activity")] {
            let d = decide(&with(json!({ "message_type": mt })));
            assert_eq!(d, FilterDecision::Reject(Rejection::ActivityMessage));
        }
        assert!(decide(&with(json!({ "message_type": "incoming" }))).accepted());
        assert!(decide(&with(json!({ "message_type": 3 }))).accepted());
    }

    #[test]
    fn rejects_bot_senders() {
        for kind in ["AgentBot", "agent_bot"] {
            let d = decide(&with(json!({ "sender": { "type": kind } })));
            assert_eq!(
                d,
                FilterDecision::Reject(Rejection::BotSender {
                    sender_type: kind.into()
                })
            );
        }
        assert!(decide(&with(json!({ "sender": { "type": "User" } }))).accepted());
    }

    #[test]
    fn bot_sender_types_are_configurable() {
        let filter = IngestionFilter::default().with_bot_sender_types(vec!["Robot".into()]);
        let ev = with(json!({ "sender": { "type": "Robot" } }));
        assert!(!filter.decide(&ev).accepted());

        let ev = with(json!({ "sender": { "type": "AgentBot" } }));
        assert!(filter.decide(&ev).accepted());
    }

    #[test]
    fn rejects_missing_agent_bot() {
        for bot in [Value::Null, json!({})] {
            let d = decide(&with(json!({ "agent_bot": bot })));
            assert_eq!(d, FilterDecision::Reject(Rejection::NoAgentBot));
        }
    }

    #[test]
    fn first_failing_rule_wins() {
        let ev = with(json!({
            "private": true,
            "content": "",
            "message_type": 1,
            "agent_bot": null
        }));
        assert_eq!(decide(&ev), FilterDecision::Reject(Rejection::PrivateNote));

        let ev = with(json!({ "content": " ", "message_type": 2 }));
        assert_eq!(decide(&ev), FilterDecision::Reject(Rejection::EmptyContent));
    }

    #[test]
    fn reasons_are_readable() {
        assert_eq!(Rejection::PrivateNote.to_string(), "private message");
        assert_eq!(
            Rejection::BotSender {
                sender_type: "AgentBot".into()
            }
            .to_string(),
            "message from bot sender 'AgentBot'"
        );
    }

    fn arb_event() -> impl Strategy<Value = Value> {
        (
            prop_oneof![
                Just(json!("message_created")),
                Just(json!("message_updated")),
                Just(Value::Null)
            ],
            proptest::option::of(any::<bool>()),
            prop_oneof![Just(json!("")), Just(json!("  ")), "[a-z ]{0,12}".prop_map(Value::from)],
            prop_oneof![(0i64..5).prop_map(Value::from), Just(json!("outgoing")), Just(Value::Null)],
            prop_oneof![Just(json!("AgentBot")), Just(json!("contact")), Just(json!("User"))],
            prop_oneof![Just(Value::Null), Just(json!({})), Just(json!({ "agent_id": 1 }))],
        )
            .prop_map(|(event, private, content, mt, sender, bot)| {
                json!({
                    "event": event,
                    "private": private,
                    "content": content,
                    "message_type": mt,
                    "sender": { "type": sender },
                    "agent_bot": bot,
                })
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn decision_is_deterministic(body in arb_event()) {
            let filter = IngestionFilter::default();
            let a = RawEvent::from_value(body.clone()).unwrap();
            let b = RawEvent::from_value(body).unwrap();

            let first = filter.decide(&a);
            prop_assert_eq!(&first, &filter.decide(&a));
            prop_assert_eq!(&first, &filter.decide(&b));
            prop_assert_eq!(first.accepted(), first.reason().is_empty());
        }
    }
}

use serde::{Deserialize, Serialize};

/// Direction/category of a chat message.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Incoming,
    Outgoing,
    Activity,
    Template,
}

impl MessageKind {
    /// Numeric code used by the platform's webhook payloads.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Incoming),
            1 => Some(Self::Outgoing),
            2 => Some(Self::Activity),
            3 => Some(Self::Template),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "incoming" => Some(Self::Incoming),
            "outgoing" => Some(Self::Outgoing),
            "activity" => Some(Self::Activity),
            "template" => Some(Self::Template),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Activity => "activity",
            Self::Template => "template",
        }
    }
}

/// Who authored a message.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    User,
    #[default]
    Contact,
    Agent,
}

impl SenderKind {
    /// Map the platform's sender `type` string. Unknown values fall back to
    /// `Contact`, the author of ordinary inbound messages.
    pub fn from_platform_type(value: &str) -> Self {
        match value {
            "AgentBot" | "agent_bot" => Self::Agent,
            "User" => Self::User,
            _ => Self::Contact,
        }
    }
}

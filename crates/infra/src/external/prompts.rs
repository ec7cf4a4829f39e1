//! System prompt resolution for the chat-completion processor.

use parley_events::AgentConfig;

pub const ASSISTANT_PROMPT: &str = "You are an intelligent virtual assistant.\n\
Help the user as well as you can.";

pub const SUPPORT_PROMPT: &str = "You are a professional and helpful customer support assistant.\n\
Answer clearly, politely and objectively.\n\
Always try to resolve the customer's question or point them to the right place.";

pub const SCHEDULING_PROMPT: &str = "You are a professional scheduling assistant.\n\
Help the customer book, reschedule or cancel appointments.\n\
Always confirm date, time and details before finishing.";

pub const SDR_PROMPT: &str = "You are a virtual SDR (Sales Development Representative).\n\
Your goal is to qualify leads and book meetings with the sales team.\n\
Be consultative and ask relevant questions about the customer's needs.";

/// Built-in prompt for an agent type, if there is one.
pub fn default_prompt(agent_type: &str) -> Option<&'static str> {
    match agent_type {
        "support" => Some(SUPPORT_PROMPT),
        "scheduling" => Some(SCHEDULING_PROMPT),
        "sdr" => Some(SDR_PROMPT),
        "assistant" => Some(ASSISTANT_PROMPT),
        _ => None,
    }
}

/// Generation parameters derived from a task's agent configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptProfile {
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl PromptProfile {
    /// Custom prompt first, then the built-in prompt for the agent type, then
    /// the generic assistant prompt. `bot_config` may override temperature and
    /// max tokens.
    pub fn resolve(config: Option<&AgentConfig>) -> Self {
        let Some(config) = config else {
            return Self {
                system_prompt: ASSISTANT_PROMPT.to_string(),
                temperature: None,
                max_tokens: None,
            };
        };

        let custom = config
            .context_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let system_prompt = custom
            .or_else(|| config.ai_agent_type.as_deref().and_then(default_prompt))
            .unwrap_or(ASSISTANT_PROMPT)
            .to_string();

        let bot_config = config.bot_config.as_ref();
        let temperature = bot_config
            .and_then(|c| c.get("temperature"))
            .and_then(serde_json::Value::as_f64)
            .map(|t| t as f32);
        let max_tokens = bot_config
            .and_then(|c| c.get("max_tokens"))
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());

        Self {
            system_prompt,
            temperature,
            max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(v: serde_json::Value) -> AgentConfig {
        AgentConfig::from_value(&v)
    }

    #[test]
    fn no_config_uses_assistant_prompt() {
        assert_eq!(PromptProfile::resolve(None).system_prompt, ASSISTANT_PROMPT);
    }

    #[test]
    fn custom_prompt_wins() {
        let c = config(json!({ "context_prompt": "Be brief.", "ai_agent_type": "sdr" }));
        assert_eq!(PromptProfile::resolve(Some(&c)).system_prompt, "Be brief.");
    }

    #[test]
    fn blank_custom_prompt_falls_back_to_agent_type() {
        let c = config(json!({ "context_prompt": "  ", "ai_agent_type": "scheduling" }));
        assert_eq!(PromptProfile::resolve(Some(&c)).system_prompt, SCHEDULING_PROMPT);
    }

    #[test]
    fn unknown_agent_type_uses_assistant_prompt() {
        let c = config(json!({ "ai_agent_type": "astrologer" }));
        assert_eq!(PromptProfile::resolve(Some(&c)).system_prompt, ASSISTANT_PROMPT);
    }

    #[test]
    fn bot_config_overrides_generation_parameters() {
        let c = config(json!({ "bot_config": { "temperature": 0.2, "max_tokens": 500 } }));
        let p = PromptProfile::resolve(Some(&c));
        assert_eq!(p.temperature, Some(0.2));
        assert_eq!(p.max_tokens, Some(500));
    }
}

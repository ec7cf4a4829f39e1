//! Default processing function: one OpenAI-compatible chat completion per task.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use parley_events::TaskEnvelope;

use super::processing::{ProcessingError, ProcessingFunction};
use super::prompts::PromptProfile;
use crate::config::LlmSettings;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionProcessor {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl ChatCompletionProcessor {
    pub fn new(settings: &LlmSettings, timeout: Duration) -> Result<Self, ProcessingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessingError::Upstream(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, profile: &'a PromptProfile, content: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &profile.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content,
                },
            ],
            temperature: profile.temperature.unwrap_or(self.temperature),
            max_tokens: profile.max_tokens,
        }
    }
}

fn first_reply(response: ChatResponse) -> Result<String, ProcessingError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(ProcessingError::EmptyReply)
}

#[async_trait]
impl ProcessingFunction for ChatCompletionProcessor {
    #[instrument(skip_all, fields(correlation_id = %task.correlation_id(), model = %self.model))]
    async fn process(&self, task: &TaskEnvelope) -> Result<String, ProcessingError> {
        let profile = PromptProfile::resolve(task.agent_config());
        let body = self.request_body(&profile, task.content());

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProcessingError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProcessingError::Upstream(format!("status {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProcessingError::Upstream(e.to_string()))?;

        let reply = first_reply(parsed)?;
        debug!(reply_len = reply.len(), "completion received");
        Ok(reply)
    }
}

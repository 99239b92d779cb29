//! OpenAI-compatible Chat Completions client.
//!
//! Non-streaming `POST /v1/chat/completions` with bearer auth. Used for the
//! HuggingFace inference router and any other OpenAI-compatible endpoint.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use parley_core::config::LlmConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::types::{CompletionResult, ConversationTurn};

use crate::{LlmClient, elapsed_ms, send_json, token_count};

const HF_ROUTER_BASE_URL: &str = "https://router.huggingface.co";

pub struct OpenAiCompatClient {
    pub base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_setting: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: Option<&str>,
        model: impl Into<String>,
        api_key: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(HF_ROUTER_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
            api_key,
            api_key_setting: "HF_TOKEN".into(),
            client,
        }
    }

    pub fn from_config(config: &LlmConfig, client: reqwest::Client) -> Self {
        let mut this = Self::new(
            Some(&config.base_url()),
            config.model(),
            config.resolve_api_key(),
            client,
        );
        this.api_key_setting = config.api_key_env_name();
        this
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default, deserialize_with = "token_count")]
    prompt_tokens: Option<u64>,
    #[serde(default, deserialize_with = "token_count")]
    completion_tokens: Option<u64>,
    #[serde(default, deserialize_with = "token_count")]
    total_tokens: Option<u64>,
}

fn format_messages(messages: &[ConversationTurn]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.text }))
        .collect()
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn id(&self) -> &str {
        "openai"
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(ParleyError::ConfigurationMissing(format!(
                "{} is not set",
                self.api_key_setting
            )));
        }
        Ok(())
    }

    async fn complete(
        &self,
        messages: &[ConversationTurn],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CompletionResult> {
        let Some(api_key) = &self.api_key else {
            return Err(ParleyError::ConfigurationMissing(format!(
                "{} is not set",
                self.api_key_setting
            )));
        };

        let body = ChatRequest {
            model: self.model.clone(),
            messages: format_messages(messages),
            max_tokens,
            temperature,
            stream: false,
        };

        debug!(model = %body.model, base_url = %self.base_url, "Calling OpenAI-compatible API");

        let started = Instant::now();
        let response: ChatResponse = send_json(
            self.client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(api_key)
                .json(&body),
        )
        .await?;
        let elapsed_ms = elapsed_ms(started);

        let answer_text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        let usage = response.usage.unwrap_or_default();

        Ok(CompletionResult {
            answer_text,
            total_tokens: usage.total_tokens,
            completion_tokens: usage.completion_tokens,
            prompt_tokens: usage.prompt_tokens,
            elapsed_ms,
            used_tool: None,
        })
    }
}

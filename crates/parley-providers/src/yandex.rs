//! Yandex Foundation Models completion API.
//!
//! Non-streaming `POST /foundationModels/v1/completion` with `Api-Key` auth.
//! The model is addressed as `gpt://<folder>/<model>`.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_core::config::LlmConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::types::{CompletionResult, ConversationTurn};

use crate::{LlmClient, elapsed_ms, send_json, token_count};

const YANDEX_BASE_URL: &str = "https://llm.api.cloud.yandex.net";
const COMPLETION_PATH: &str = "/foundationModels/v1/completion";

pub struct YandexGptClient {
    pub base_url: String,
    model: String,
    api_key: Option<String>,
    folder_id: Option<String>,
    api_key_setting: String,
    folder_id_setting: String,
    client: reqwest::Client,
}

impl YandexGptClient {
    pub fn new(
        base_url: Option<&str>,
        model: impl Into<String>,
        api_key: Option<String>,
        folder_id: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(YANDEX_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
            api_key,
            folder_id,
            api_key_setting: "YANDEX_API_KEY".into(),
            folder_id_setting: "YC_FOLDER_ID".into(),
            client,
        }
    }

    pub fn from_config(config: &LlmConfig, client: reqwest::Client) -> Self {
        let mut this = Self::new(
            Some(&config.base_url()),
            config.model(),
            config.resolve_api_key(),
            config.resolve_folder_id(),
            client,
        );
        this.api_key_setting = config.api_key_env_name();
        this.folder_id_setting = config.folder_id_env_name();
        this
    }

    fn model_uri(&self, folder_id: &str) -> String {
        format!("gpt://{folder_id}/{}", self.model)
    }
}

// --- Yandex request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct YandexRequest<'a> {
    model_uri: String,
    completion_options: CompletionOptions,
    messages: &'a [ConversationTurn],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOptions {
    stream: bool,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct YandexResponse {
    #[serde(default)]
    result: YandexResult,
}

#[derive(Debug, Default, Deserialize)]
struct YandexResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
    #[serde(default)]
    usage: Option<YandexUsage>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    message: Option<AlternativeMessage>,
}

#[derive(Debug, Deserialize)]
struct AlternativeMessage {
    #[serde(default)]
    text: String,
}

/// Yandex reports counters as decimal strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YandexUsage {
    #[serde(default, deserialize_with = "token_count")]
    input_text_tokens: Option<u64>,
    #[serde(default, deserialize_with = "token_count")]
    completion_tokens: Option<u64>,
    #[serde(default, deserialize_with = "token_count")]
    total_tokens: Option<u64>,
}

#[async_trait]
impl LlmClient for YandexGptClient {
    fn id(&self) -> &str {
        "yandex"
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(ParleyError::ConfigurationMissing(format!(
                "{} is not set",
                self.api_key_setting
            )));
        }
        if self.folder_id.is_none() {
            return Err(ParleyError::ConfigurationMissing(format!(
                "{} is not set",
                self.folder_id_setting
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
        self.ensure_configured()?;
        let (Some(api_key), Some(folder_id)) = (&self.api_key, &self.folder_id) else {
            return Err(ParleyError::ConfigurationMissing(self.api_key_setting.clone()));
        };

        let body = YandexRequest {
            model_uri: self.model_uri(folder_id),
            completion_options: CompletionOptions {
                stream: false,
                temperature,
                max_tokens,
            },
            messages,
        };

        debug!(model = %body.model_uri, messages = messages.len(), "Calling Yandex completion API");

        let started = Instant::now();
        let response: YandexResponse = send_json(
            self.client
                .post(format!("{}{COMPLETION_PATH}", self.base_url))
                .header("Authorization", format!("Api-Key {api_key}"))
                .json(&body),
        )
        .await?;
        let elapsed_ms = elapsed_ms(started);

        let answer_text = response
            .result
            .alternatives
            .into_iter()
            .next()
            .and_then(|a| a.message)
            .map(|m| m.text.trim().to_string())
            .unwrap_or_default();
        let usage = response.result.usage.unwrap_or_default();

        debug!(elapsed_ms, total_tokens = ?usage.total_tokens, "Yandex completion finished");

        Ok(CompletionResult {
            answer_text,
            total_tokens: usage.total_tokens,
            completion_tokens: usage.completion_tokens,
            prompt_tokens: usage.input_text_tokens,
            elapsed_ms,
            used_tool: None,
        })
    }
}

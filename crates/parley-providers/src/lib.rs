//! LLM completion clients.
//!
//! Each client implements [`LlmClient`]: a stateless mapping from an ordered
//! message list to a [`CompletionResult`]. Generation parameters are always
//! sent explicitly, non-success statuses surface as
//! [`ParleyError::Upstream`] carrying the status and body, and usage counters
//! are optional.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use parley_core::config::{LlmConfig, LlmProviderKind};
use parley_core::error::{ParleyError, Result};
use parley_core::types::{CompletionResult, ConversationTurn};

pub mod openai;
pub mod yandex;

pub use openai::OpenAiCompatClient;
pub use yandex::YandexGptClient;

/// A chat completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider identifier (e.g. "yandex").
    fn id(&self) -> &str;

    /// Fail with [`ParleyError::ConfigurationMissing`] naming the unset
    /// setting when the client cannot make requests.
    fn ensure_configured(&self) -> Result<()> {
        Ok(())
    }

    async fn complete(
        &self,
        messages: &[ConversationTurn],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CompletionResult>;
}

/// Build the client selected by the `llm` config section.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let http = http_client(config.request_timeout_secs())?;
    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProviderKind::Yandex => Arc::new(YandexGptClient::from_config(config, http)),
        LlmProviderKind::OpenAi => Arc::new(OpenAiCompatClient::from_config(config, http)),
    };
    Ok(client)
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ParleyError::Config(format!("failed to build HTTP client: {e}")))
}

/// Send a JSON request and decode the JSON response body.
pub(crate) async fn send_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| ParleyError::Connection(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ParleyError::Connection(e.to_string()))?;

    if !status.is_success() {
        return Err(ParleyError::Upstream {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| ParleyError::Upstream {
        status: status.as_u16(),
        body: format!("unexpected response ({e}): {body}"),
    })
}

/// Token counter that tolerates absence, `null`, numbers, and numeric strings.
pub(crate) fn token_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

pub(crate) fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Counters {
        #[serde(default, deserialize_with = "token_count")]
        a: Option<u64>,
        #[serde(default, deserialize_with = "token_count")]
        b: Option<u64>,
        #[serde(default, deserialize_with = "token_count")]
        c: Option<u64>,
        #[serde(default, deserialize_with = "token_count")]
        d: Option<u64>,
    }

    #[test]
    fn test_token_count_is_lenient() {
        let counters: Counters =
            serde_json::from_str(r#"{"a": 12, "b": "34", "c": "n/a"}"#).unwrap();
        assert_eq!(counters.a, Some(12));
        assert_eq!(counters.b, Some(34));
        assert_eq!(counters.c, None);
        assert_eq!(counters.d, None);
    }

    #[test]
    fn test_build_client_selects_provider() {
        let yandex = build_client(&LlmConfig::default()).unwrap();
        assert_eq!(yandex.id(), "yandex");

        let openai = build_client(&LlmConfig {
            provider: LlmProviderKind::OpenAi,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(openai.id(), "openai");
    }
}

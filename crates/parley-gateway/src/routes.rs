//! HTTP handlers.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use parley_agent::ChatOutcome;
use parley_core::error::ParleyError;

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

/// Error body for every 4xx/5xx response: `{"error": "..."}`.
pub struct ApiError(ParleyError);

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!(error = %self.0, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    prompt: String,
}

/// `POST /chat`: plain-text answer plus a statistics footer.
pub async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<String, ApiError> {
    // Malformed bodies read as an empty prompt.
    let request: ChatRequest = serde_json::from_slice(&body).unwrap_or_default();
    let outcome = state.orchestrator.chat(&request.prompt).await?;
    Ok(render_reply(&outcome))
}

/// `GET /history`
pub async fn history_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    state.compactor.wait_idle().await;
    let messages = state.history.snapshot().await;
    Json(json!({
        "messages": messages,
        "role": state.persona.label(),
    }))
}

/// `POST /clear`
pub async fn clear_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    state.compactor.wait_idle().await;
    state.history.clear().await;
    Json(json!({"cleared": true}))
}

/// `GET /issueSummary`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

pub async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.connection_count().await,
        "history_len": state.history.len().await,
    }))
}

/// Answer text followed by the usage footer. Token counts are only printed
/// when the provider reported them.
pub fn render_reply(outcome: &ChatOutcome) -> String {
    let result = &outcome.result;
    let mut reply = format!("{}\n\n---", result.answer_text);
    for (label, value) in [
        ("total_tokens", result.total_tokens),
        ("completion_tokens", result.completion_tokens),
        ("prompt_tokens", result.prompt_tokens),
    ] {
        if let Some(value) = value {
            let _ = write!(reply, "\n{label}: {value}");
        }
    }
    let _ = write!(reply, "\nrequest_time_ms: {}", result.elapsed_ms);
    if let Some(tools) = &result.used_tool {
        let _ = write!(reply, "\nused_tools: {tools}");
    }
    if outcome.round_limit_reached {
        reply.push_str("\n[tool round limit reached]");
    }
    reply
}

#[cfg(test)]
mod tests {
    use parley_core::types::CompletionResult;

    use super::*;

    fn outcome(result: CompletionResult, round_limit_reached: bool) -> ChatOutcome {
        ChatOutcome {
            result,
            rounds: 0,
            round_limit_reached,
        }
    }

    #[test]
    fn test_footer_with_all_counters() {
        let reply = render_reply(&outcome(
            CompletionResult {
                answer_text: "Hello".into(),
                total_tokens: Some(30),
                completion_tokens: Some(10),
                prompt_tokens: Some(20),
                elapsed_ms: 412,
                used_tool: Some("echo, search".into()),
            },
            false,
        ));
        assert_eq!(
            reply,
            "Hello\n\n---\ntotal_tokens: 30\ncompletion_tokens: 10\nprompt_tokens: 20\n\
             request_time_ms: 412\nused_tools: echo, search"
        );
    }

    #[test]
    fn test_footer_omits_missing_counters() {
        let reply = render_reply(&outcome(
            CompletionResult {
                answer_text: "Hi".into(),
                total_tokens: Some(7),
                elapsed_ms: 3,
                ..Default::default()
            },
            true,
        ));
        assert_eq!(
            reply,
            "Hi\n\n---\ntotal_tokens: 7\nrequest_time_ms: 3\n[tool round limit reached]"
        );
    }

    #[test]
    fn test_api_error_status() {
        let bad = ApiError(ParleyError::Validation("Field 'prompt' is required".into())).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let missing =
            ApiError(ParleyError::ConfigurationMissing("YANDEX_API_KEY".into())).into_response();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let upstream = ApiError(ParleyError::Upstream {
            status: 503,
            body: "busy".into(),
        })
        .into_response();
        assert_eq!(upstream.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Configuration loading and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::persona::Persona;

/// Top-level Parley configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- LLM provider ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    /// Yandex Foundation Models completion API.
    #[default]
    Yandex,
    /// Any OpenAI-compatible chat completions endpoint (HuggingFace router, vLLM, ...).
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Yandex Cloud folder id, part of the model URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl LlmConfig {
    /// Environment variable consulted for the API key.
    pub fn api_key_env_name(&self) -> String {
        self.api_key_env.clone().unwrap_or_else(|| {
            match self.provider {
                LlmProviderKind::Yandex => "YANDEX_API_KEY",
                LlmProviderKind::OpenAi => "HF_TOKEN",
            }
            .to_string()
        })
    }

    pub fn folder_id_env_name(&self) -> String {
        self.folder_id_env
            .clone()
            .unwrap_or_else(|| "YC_FOLDER_ID".to_string())
    }

    /// Resolve the API key: check `api_key` first, then the env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &Some(self.api_key_env_name()))
    }

    pub fn resolve_folder_id(&self) -> Option<String> {
        resolve_secret_field(&self.folder_id, &Some(self.folder_id_env_name()))
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| {
            match self.provider {
                LlmProviderKind::Yandex => "yandexgpt-5.1",
                LlmProviderKind::OpenAi => "deepseek-ai/DeepSeek-V3-0324",
            }
            .to_string()
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| {
            match self.provider {
                LlmProviderKind::Yandex => "https://llm.api.cloud.yandex.net",
                LlmProviderKind::OpenAi => "https://router.huggingface.co",
            }
            .to_string()
        })
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(2000)
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs.unwrap_or(120)
    }
}

// --- Gateway ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    8080
}

// --- History ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// History file path (default: `~/.parley/history.json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Compaction runs once the history grows past this many turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compaction_temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compaction_max_tokens: Option<u32>,
}

// --- Agent ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,

    /// Replaces the persona's system prompt text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Replaces the persona's sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_rounds: Option<u32>,
}

// --- Tool servers ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Ordered tool servers. The first one is the primary server.
    #[serde(default)]
    pub servers: Vec<ToolServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Streamable HTTP MCP endpoint, e.g. `http://127.0.0.1:11020/mcp`.
    pub endpoint: String,
}

impl ToolServerConfig {
    pub fn display_name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| self.id.clone())
    }
}

// --- Issue summary ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    /// Tool server to query (default: the primary server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub tool_name: String,
    pub per_page: u32,
    pub refresh_secs: u64,
    pub heartbeat_secs: u64,
    pub max_body_chars: usize,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_id: None,
            tool_name: "github_issue_comments".into(),
            per_page: 20,
            refresh_secs: 60,
            heartbeat_secs: 10,
            max_body_chars: 500,
            temperature: 0.2,
            max_tokens: 800,
        }
    }
}

// --- Logging ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "parley_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.trim().is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.trim().is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);
        Self::parse(&substituted)
    }

    /// Parse config text (JSON5) without env substitution.
    pub fn parse(text: &str) -> crate::error::Result<Self> {
        json5::from_str(text).map_err(|e| crate::error::ParleyError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn llm(&self) -> LlmConfig {
        self.llm.clone().unwrap_or_default()
    }

    /// Gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(8080)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Resolve the history file path.
    pub fn history_path(&self) -> PathBuf {
        self.history
            .as_ref()
            .and_then(|h| h.path.as_ref())
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
            .unwrap_or_else(|| data_dir().join("history.json"))
    }

    pub fn max_turns(&self) -> usize {
        self.history
            .as_ref()
            .and_then(|h| h.max_turns)
            .unwrap_or(10)
    }

    pub fn compaction_temperature(&self) -> f64 {
        self.history
            .as_ref()
            .and_then(|h| h.compaction_temperature)
            .unwrap_or(0.3)
    }

    pub fn compaction_max_tokens(&self) -> u32 {
        self.history
            .as_ref()
            .and_then(|h| h.compaction_max_tokens)
            .unwrap_or(1000)
    }

    pub fn persona(&self) -> Persona {
        self.agent
            .as_ref()
            .and_then(|a| a.persona)
            .unwrap_or_default()
    }

    /// System prompt: explicit override, else the persona description.
    pub fn system_prompt(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.system_prompt.clone())
            .unwrap_or_else(|| self.persona().description().to_string())
    }

    pub fn chat_temperature(&self) -> f64 {
        self.agent
            .as_ref()
            .and_then(|a| a.temperature)
            .unwrap_or_else(|| self.persona().temperature())
    }

    pub fn max_tool_rounds(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_tool_rounds)
            .unwrap_or(5)
    }

    pub fn tool_servers(&self) -> &[ToolServerConfig] {
        self.tools
            .as_ref()
            .map(|t| t.servers.as_slice())
            .unwrap_or(&[])
    }

    pub fn tool_connect_attempts(&self) -> u32 {
        self.tools
            .as_ref()
            .and_then(|t| t.connect_attempts)
            .unwrap_or(3)
    }

    pub fn tool_retry_delay_ms(&self) -> u64 {
        self.tools
            .as_ref()
            .and_then(|t| t.retry_delay_ms)
            .unwrap_or(120)
    }

    pub fn tool_call_timeout_secs(&self) -> u64 {
        self.tools
            .as_ref()
            .and_then(|t| t.call_timeout_secs)
            .unwrap_or(60)
    }

    pub fn summary(&self) -> SummaryConfig {
        self.summary.clone().unwrap_or_default()
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let llm = self.llm();
        if llm.resolve_api_key().is_none() {
            warnings.push(format!(
                "LLM API key is not configured (set llm.api_key or {})",
                llm.api_key_env_name()
            ));
        }
        if llm.provider == LlmProviderKind::Yandex && llm.resolve_folder_id().is_none() {
            warnings.push(format!(
                "Yandex folder id is not configured (set llm.folder_id or {})",
                llm.folder_id_env_name()
            ));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        if self.max_turns() == 0 {
            errors.push("history.max_turns must be at least 1".to_string());
        }
        if self.max_tool_rounds() == 0 {
            errors.push("agent.max_tool_rounds must be at least 1".to_string());
        }

        let servers = self.tool_servers();
        if servers.is_empty() {
            warnings.push("No tool servers configured; tool use is disabled".to_string());
        }
        let mut seen = HashSet::new();
        for server in servers {
            if !seen.insert(server.id.as_str()) {
                errors.push(format!("Duplicate tool server id '{}'", server.id));
            }
            if server.endpoint.trim().is_empty() {
                errors.push(format!("Tool server '{}' has no endpoint", server.id));
            }
        }

        let summary = self.summary();
        if summary.enabled {
            if servers.is_empty() {
                errors.push("summary.enabled requires at least one tool server".to_string());
            }
            if let Some(id) = &summary.server_id {
                if !servers.iter().any(|s| &s.id == id) {
                    errors.push(format!("summary.server_id '{id}' is not a configured tool server"));
                }
            }
            if summary.refresh_secs == 0 || summary.heartbeat_secs == 0 {
                errors.push("summary intervals must be at least 1 second".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Parley data: `~/.parley/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }
}

/// Result of one LLM completion call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub answer_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    pub elapsed_ms: u64,
    /// Comma-joined names of the tools used while producing this answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_tool: Option<String>,
}

/// Latest background-computed summary pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySnapshot {
    pub text: String,
    pub timestamp_ms: i64,
    pub version: u64,
}

/// A tool advertised by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Statically typed tool parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<ToolValue>),
    Map(BTreeMap<String, ToolValue>),
}

/// Named tool parameters.
pub type ToolParams = BTreeMap<String, ToolValue>;

impl From<serde_json::Value> for ToolValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ToolValue::Null,
            Value::Bool(b) => ToolValue::Bool(b),
            Value::Number(n) => ToolValue::Number(n),
            Value::String(s) => ToolValue::String(s),
            Value::Array(items) => ToolValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                ToolValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<ToolValue> for serde_json::Value {
    fn from(value: ToolValue) -> Self {
        use serde_json::Value;
        match value {
            ToolValue::Null => Value::Null,
            ToolValue::Bool(b) => Value::Bool(b),
            ToolValue::Number(n) => Value::Number(n),
            ToolValue::String(s) => Value::String(s),
            ToolValue::List(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            ToolValue::Map(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for ToolValue {
    fn from(s: &str) -> Self {
        ToolValue::String(s.to_string())
    }
}

impl From<i64> for ToolValue {
    fn from(n: i64) -> Self {
        ToolValue::Number(n.into())
    }
}

impl From<bool> for ToolValue {
    fn from(b: bool) -> Self {
        ToolValue::Bool(b)
    }
}

/// Convert a JSON object into tool parameters. Non-object values yield no parameters.
pub fn params_from_json(value: serde_json::Value) -> ToolParams {
    match value {
        serde_json::Value::Object(map) => map.into_iter().map(|(k, v)| (k, v.into())).collect(),
        _ => ToolParams::new(),
    }
}

/// Convert tool parameters into a JSON object.
pub fn params_to_json(params: &ToolParams) -> serde_json::Map<String, serde_json::Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
        .collect()
}

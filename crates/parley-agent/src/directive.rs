//! Tool-call directives embedded in model answers.
//!
//! A model requests a tool by writing the marker followed by either a JSON
//! object `{"name": "...", "parameters": {...}}` or a bare tool name.

use parley_core::types::{ToolParams, params_from_json};

/// Marker that introduces a tool request. Matched case-insensitively.
pub const TOOL_MARKER: &str = "MCP_TOOL:";

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDirective {
    pub tool_name: String,
    pub parameters: ToolParams,
}

/// Extract a tool request from an answer.
///
/// Returns `None` when there is no marker, nothing follows it, or the JSON
/// form is malformed or names no tool.
pub fn parse_tool_directive(answer: &str) -> Option<ToolCallDirective> {
    // ASCII lowercasing keeps byte offsets aligned with `answer`.
    let idx = answer
        .to_ascii_lowercase()
        .find(&TOOL_MARKER.to_ascii_lowercase())?;
    let after = answer[idx + TOOL_MARKER.len()..].trim();
    if after.is_empty() {
        return None;
    }

    if after.starts_with('{') {
        return parse_structured(after);
    }

    let name = after.lines().next().unwrap_or_default().trim();
    if name.is_empty() {
        return None;
    }
    Some(ToolCallDirective {
        tool_name: name.to_string(),
        parameters: ToolParams::new(),
    })
}

fn parse_structured(text: &str) -> Option<ToolCallDirective> {
    // Only the first JSON value counts; trailing prose is ignored.
    let value = serde_json::Deserializer::from_str(text)
        .into_iter::<serde_json::Value>()
        .next()?
        .ok()?;
    let object = value.as_object()?;
    let name = object.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let parameters = object
        .get("parameters")
        .cloned()
        .map(params_from_json)
        .unwrap_or_default();
    Some(ToolCallDirective {
        tool_name: name.to_string(),
        parameters,
    })
}

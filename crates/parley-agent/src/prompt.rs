//! Prompt text sent to the model.

use parley_tools::CatalogEntry;

use crate::directive::TOOL_MARKER;

/// Build the system prompt: persona text, then the tool catalog and the
/// directive format when any tools are available.
pub fn build_system_prompt(persona_prompt: &str, catalog: &[CatalogEntry]) -> String {
    if catalog.is_empty() {
        return persona_prompt.to_string();
    }

    let mut parts = vec![persona_prompt.to_string()];
    parts.push(format!(
        "You have access to the following tools:\n{}",
        format_tool_catalog(catalog)
    ));
    parts.push(format!(
        "You may request any of these tools. If a tool needs data you do not have yet \
         but another tool can provide it, request that other tool first.\n\
         To request a tool, reply in the format: {TOOL_MARKER} {{\"name\":\"tool.name\",\"parameters\":{{...}}}}\n\
         For example: {TOOL_MARKER} {{\"name\":\"list_activities\",\"parameters\":{{\"city_id\":\"213\"}}}}"
    ));
    parts.join("\n\n")
}

/// One line per tool: name, description and input schema.
pub fn format_tool_catalog(catalog: &[CatalogEntry]) -> String {
    catalog
        .iter()
        .map(|entry| {
            format!(
                "- name: {}, description: {}, inputSchema: {}",
                entry.tool.name,
                entry.tool.description.as_deref().unwrap_or(""),
                entry.tool.input_schema
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// User turn that feeds a tool outcome back to the model.
pub fn tool_result_message(tool_name: &str, outcome: &Result<String, String>) -> String {
    let report = match outcome {
        Ok(output) => format!("Result of tool {tool_name}:\n{output}"),
        Err(reason) => format!("Tool {tool_name} failed: {reason}"),
    };
    format!(
        "{report}\n\nYou must analyse this result and either request another tool using \
         {TOOL_MARKER} or give the final answer to the user."
    )
}

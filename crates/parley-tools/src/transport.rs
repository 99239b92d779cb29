//! MCP client transport.
//!
//! [`RmcpTransport`] opens one streamable-HTTP session per operation using
//! `rmcp`; the registry tears it down again once the operation completes.

use std::time::Duration;

use async_trait::async_trait;
use rmcp::ServiceExt;
use rmcp::service::{RoleClient, RunningService};
use serde_json::json;
use tracing::{debug, warn};

use parley_core::error::{ParleyError, Result};
use parley_core::types::ToolInfo;

/// Opens sessions to tool server endpoints.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn McpSession>>;
}

/// One live connection to a tool server.
#[async_trait]
pub trait McpSession: Send {
    async fn list_tools(&mut self) -> Result<Vec<ToolInfo>>;

    /// Call a tool and return the text fragments of its result, in order.
    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>>;

    async fn close(self: Box<Self>);
}

/// Streamable HTTP transport backed by `rmcp`.
pub struct RmcpTransport {
    handshake_timeout: Duration,
}

impl RmcpTransport {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for RmcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl McpTransport for RmcpTransport {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn McpSession>> {
        use rmcp::transport::StreamableHttpClientTransport;

        let transport = StreamableHttpClientTransport::from_uri(endpoint);
        let service = tokio::time::timeout(self.handshake_timeout, ().serve(transport))
            .await
            .map_err(|_| {
                ParleyError::Connection(format!(
                    "MCP handshake with {endpoint} timed out after {}s",
                    self.handshake_timeout.as_secs()
                ))
            })?
            .map_err(|e| ParleyError::Connection(format!("MCP handshake with {endpoint} failed: {e}")))?;

        debug!(endpoint, "MCP session opened");
        Ok(Box::new(RmcpSession {
            endpoint: endpoint.to_string(),
            service,
        }))
    }
}

struct RmcpSession {
    endpoint: String,
    service: RunningService<RoleClient, ()>,
}

#[async_trait]
impl McpSession for RmcpSession {
    async fn list_tools(&mut self) -> Result<Vec<ToolInfo>> {
        let tools = self
            .service
            .list_all_tools()
            .await
            .map_err(|e| ParleyError::Tool(format!("failed to list tools from {}: {e}", self.endpoint)))?;

        Ok(tools
            .into_iter()
            .map(|t| ToolInfo {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: serde_json::to_value(&*t.input_schema).unwrap_or_default(),
            })
            .collect())
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>> {
        let params: rmcp::model::CallToolRequestParams =
            serde_json::from_value(json!({ "name": name, "arguments": arguments }))?;

        let result = self
            .service
            .call_tool(params)
            .await
            .map_err(|e| ParleyError::Tool(format!("tool '{name}' call failed: {e}")))?;

        let result = serde_json::to_value(&result)?;
        let fragments = text_fragments(&result);
        if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
            return Err(ParleyError::Tool(format!(
                "tool '{name}' reported an error: {}",
                fragments.join("\n").trim()
            )));
        }
        Ok(fragments)
    }

    async fn close(self: Box<Self>) {
        let RmcpSession { endpoint, service } = *self;
        if let Err(e) = service.cancel().await {
            warn!(endpoint = %endpoint, "error closing MCP session: {e}");
        }
    }
}

/// Collect the `text` content items of a serialized tool result.
pub(crate) fn text_fragments(result: &serde_json::Value) -> Vec<String> {
    result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

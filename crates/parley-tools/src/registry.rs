//! Tool registry: tracks tool servers and routes list/call operations.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use parley_core::config::Config;
use parley_core::error::{ParleyError, Result};
use parley_core::types::{ToolInfo, ToolParams, params_to_json};

use crate::transport::{McpSession, McpTransport, RmcpTransport};
use crate::{RemoteToolServer, ToolServer};

/// Returned in place of an empty tool result.
pub const EMPTY_TOOL_OUTPUT: &str = "Tool returned no output";

/// Connect retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(120),
        }
    }
}

/// A tool together with the server that advertises it.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub server_id: String,
    pub tool: ToolInfo,
}

/// Registry of tool servers, in registration order. The first one is the
/// primary server.
pub struct ToolRegistry {
    servers: Vec<Arc<dyn ToolServer>>,
    transport: Arc<dyn McpTransport>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            servers: Vec::new(),
            transport,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
        }
    }

    /// Registry with one [`RemoteToolServer`] per configured server.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new(Arc::new(RmcpTransport::default()))
            .with_retry(RetryPolicy {
                attempts: config.tool_connect_attempts(),
                delay: Duration::from_millis(config.tool_retry_delay_ms()),
            })
            .with_call_timeout(Duration::from_secs(config.tool_call_timeout_secs()));
        for server in config.tool_servers() {
            registry.register(Arc::new(RemoteToolServer::from_config(server)));
        }
        registry
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Register a server. A second server with an already registered id is ignored.
    pub fn register(&mut self, server: Arc<dyn ToolServer>) {
        if self.get(server.id()).is_some() {
            warn!(server = %server.id(), "Tool server already registered, ignoring duplicate");
            return;
        }
        info!(server = %server.id(), endpoint = %server.endpoint(), "Registered tool server");
        self.servers.push(server);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ToolServer>> {
        self.servers.iter().find(|s| s.id() == id).cloned()
    }

    pub fn servers(&self) -> &[Arc<dyn ToolServer>] {
        &self.servers
    }

    pub fn primary_id(&self) -> Option<&str> {
        self.servers.first().map(|s| s.id())
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Look up a server and start it if it is not running yet.
    pub async fn ensure_running(&self, id: &str) -> Result<Arc<dyn ToolServer>> {
        let server = self
            .get(id)
            .ok_or_else(|| ParleyError::Tool(format!("unknown tool server '{id}'")))?;
        if !server.is_running() {
            server.start().await?;
        }
        Ok(server)
    }

    pub async fn start_all(&self) {
        for server in &self.servers {
            if let Err(e) = server.start().await {
                warn!(server = %server.id(), %e, "Failed to start tool server");
            }
        }
    }

    pub async fn stop_all(&self) {
        for server in &self.servers {
            if let Err(e) = server.stop().await {
                warn!(server = %server.id(), %e, "Failed to stop tool server");
            }
        }
    }

    async fn connect(&self, server: &dyn ToolServer) -> Result<Box<dyn McpSession>> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.transport.connect(server.endpoint()).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!(server = %server.id(), attempt, attempts, %e, "Tool server connect failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }
        Err(ParleyError::Connection(format!(
            "could not connect to tool server '{}' after {attempts} attempts: {}",
            server.id(),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// List the tools advertised by one server.
    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolInfo>> {
        let server = self.ensure_running(server_id).await?;
        let mut session = self.connect(server.as_ref()).await?;
        let tools = session.list_tools().await;
        session.close().await;
        let tools = tools?;
        debug!(server = %server_id, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// List tools from every server. Servers that fail are logged and skipped.
    pub async fn list_all_tools(&self) -> Vec<(String, Vec<ToolInfo>)> {
        let mut all = Vec::new();
        for server in &self.servers {
            match self.list_tools(server.id()).await {
                Ok(tools) => all.push((server.id().to_string(), tools)),
                Err(e) => warn!(server = %server.id(), %e, "Skipping tool server"),
            }
        }
        all
    }

    /// Flat tool catalog across all servers, in server order.
    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        self.list_all_tools()
            .await
            .into_iter()
            .flat_map(|(server_id, tools)| {
                tools.into_iter().map(move |tool| CatalogEntry {
                    server_id: server_id.clone(),
                    tool,
                })
            })
            .collect()
    }

    /// Call a tool and return its text output, trimmed. Never returns an
    /// empty string on success.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        params: &ToolParams,
    ) -> Result<String> {
        let server = self.ensure_running(server_id).await?;
        let mut session = self.connect(server.as_ref()).await?;

        debug!(server = %server_id, tool = %tool_name, "Calling tool");
        let outcome = tokio::time::timeout(
            self.call_timeout,
            session.call_tool(tool_name, params_to_json(params)),
        )
        .await;
        session.close().await;

        let fragments = outcome.map_err(|_| {
            ParleyError::Tool(format!(
                "tool '{tool_name}' timed out after {}s",
                self.call_timeout.as_secs()
            ))
        })??;

        let text = fragments.join("\n").trim().to_string();
        if text.is_empty() {
            Ok(EMPTY_TOOL_OUTPUT.to_string())
        } else {
            Ok(text)
        }
    }
}

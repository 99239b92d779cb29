//! Tool servers and the registry that calls them.
//!
//! A tool server is an external process speaking the Model Context Protocol.
//! Each server implements the [`ToolServer`] lifecycle trait; the
//! [`ToolRegistry`] connects to servers lazily through an [`McpTransport`]
//! to list and call their tools.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::info;

use parley_core::config::ToolServerConfig;
use parley_core::error::Result;

pub mod registry;
pub mod transport;

pub use registry::{CatalogEntry, RetryPolicy, ToolRegistry};
pub use transport::{McpSession, McpTransport, RmcpTransport};

/// Lifecycle of one tool server entry.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Stable identifier (e.g. "core").
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// MCP endpoint URL.
    fn endpoint(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// A tool server hosted outside this process, reached over streamable HTTP.
///
/// Starting and stopping only toggle whether the registry will route calls
/// to it.
pub struct RemoteToolServer {
    id: String,
    display_name: String,
    description: Option<String>,
    endpoint: String,
    running: AtomicBool,
}

impl RemoteToolServer {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            description: None,
            endpoint: endpoint.into(),
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ToolServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            display_name: config.display_name(),
            description: config.description.clone(),
            endpoint: config.endpoint.clone(),
            running: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ToolServer for RemoteToolServer {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn start(&self) -> Result<()> {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!(server = %self.id, endpoint = %self.endpoint, "Tool server enabled");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(server = %self.id, "Tool server disabled");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

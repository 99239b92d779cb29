//! Scripted LLM and tool transport doubles for the agent tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use parley_core::error::{ParleyError, Result};
use parley_core::types::{CompletionResult, ConversationTurn, ToolInfo};
use parley_providers::LlmClient;
use parley_tools::{McpSession, McpTransport, RemoteToolServer, RetryPolicy, ToolRegistry};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ConversationTurn>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Answers with queued responses; once the queue is empty it repeats `fallback`.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: String,
    pub calls: Mutex<Vec<RecordedCall>>,
    /// When set, each call waits for one notification before answering.
    pub gate: Option<Arc<Notify>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: "fallback answer".into(),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn answers(answers: &[&str]) -> Self {
        Self::new(answers.iter().map(|a| Ok(a.to_string())).collect())
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = fallback.to_string();
        self
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call(&self, index: usize) -> RecordedCall {
        self.calls.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[ConversationTurn],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<CompletionResult> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            temperature,
            max_tokens,
        });
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()));
        match next {
            Ok(answer_text) => Ok(CompletionResult {
                answer_text,
                total_tokens: Some(10),
                completion_tokens: Some(4),
                prompt_tokens: Some(6),
                elapsed_ms: 5,
                used_tool: None,
            }),
            Err(body) => Err(ParleyError::Upstream { status: 500, body }),
        }
    }
}

/// In-process tool server double: fixed tool list, canned outputs per tool.
#[derive(Default)]
pub struct FakeTools {
    pub tools: Vec<ToolInfo>,
    pub outputs: HashMap<String, std::result::Result<String, String>>,
    pub calls: Arc<Mutex<Vec<(String, String, serde_json::Value)>>>,
    /// When set, each tool listing waits for one notification.
    pub list_gate: Option<Arc<Notify>>,
    pub listings: Arc<AtomicUsize>,
}

impl FakeTools {
    pub fn with_tool(mut self, name: &str, output: std::result::Result<&str, &str>) -> Self {
        self.tools.push(ToolInfo {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: serde_json::json!({"type": "object"}),
        });
        self.outputs.insert(
            name.to_string(),
            output.map(str::to_string).map_err(str::to_string),
        );
        self
    }

    pub fn with_list_gate(mut self, gate: Arc<Notify>) -> Self {
        self.list_gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn listing_count(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    endpoint: String,
    tools: Vec<ToolInfo>,
    outputs: HashMap<String, std::result::Result<String, String>>,
    calls: Arc<Mutex<Vec<(String, String, serde_json::Value)>>>,
    list_gate: Option<Arc<Notify>>,
    listings: Arc<AtomicUsize>,
}

#[async_trait]
impl McpTransport for FakeTools {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn McpSession>> {
        Ok(Box::new(FakeSession {
            endpoint: endpoint.to_string(),
            tools: self.tools.clone(),
            outputs: self.outputs.clone(),
            calls: self.calls.clone(),
            list_gate: self.list_gate.clone(),
            listings: self.listings.clone(),
        }))
    }
}

#[async_trait]
impl McpSession for FakeSession {
    async fn list_tools(&mut self) -> Result<Vec<ToolInfo>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.list_gate {
            gate.notified().await;
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>> {
        self.calls.lock().unwrap().push((
            self.endpoint.clone(),
            name.to_string(),
            serde_json::Value::Object(arguments),
        ));
        match self.outputs.get(name) {
            Some(Ok(text)) => Ok(vec![text.clone()]),
            Some(Err(reason)) => Err(ParleyError::Tool(reason.clone())),
            None => Err(ParleyError::Tool(format!("unknown tool '{name}'"))),
        }
    }

    async fn close(self: Box<Self>) {}
}

/// Registry with a single "core" server backed by `tools`.
pub fn registry_with(tools: Arc<FakeTools>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new(tools).with_retry(RetryPolicy {
        attempts: 1,
        delay: std::time::Duration::from_millis(1),
    });
    registry.register(Arc::new(RemoteToolServer::new("core", "http://core/mcp")));
    Arc::new(registry)
}

/// Registry with no servers.
pub fn empty_registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::new(Arc::new(FakeTools::default())))
}

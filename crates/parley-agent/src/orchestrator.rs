//! Tool-use orchestrator: one chat request, zero or more tool rounds.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use parley_core::config::Config;
use parley_core::error::{ParleyError, Result};
use parley_core::history::HistoryStore;
use parley_core::types::{CompletionResult, ConversationTurn};
use parley_providers::LlmClient;
use parley_tools::{CatalogEntry, ToolRegistry};

use crate::compaction::Compactor;
use crate::directive::{ToolCallDirective, parse_tool_directive};
use crate::prompt::{build_system_prompt, tool_result_message};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Persona text; the tool catalog is appended per request.
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Maximum number of tool calls per request.
    pub max_rounds: u32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_prompt: config.system_prompt(),
            temperature: config.chat_temperature(),
            max_tokens: config.llm().max_tokens(),
            max_rounds: config.max_tool_rounds(),
        }
    }
}

/// Final result of a chat request.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub result: CompletionResult,
    /// Number of tool calls made.
    pub rounds: u32,
    /// The model still asked for a tool when the round cap was hit.
    pub round_limit_reached: bool,
}

enum LoopState {
    AwaitingModel,
    ToolRequested {
        answer: String,
        directive: ToolCallDirective,
    },
    Done(CompletionResult),
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    history: Arc<HistoryStore>,
    compactor: Arc<Compactor>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        history: Arc<HistoryStore>,
        compactor: Arc<Compactor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            llm,
            tools,
            history,
            compactor,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Answer `prompt` against the stored history.
    ///
    /// Only the user turn and the final answer are appended to the history;
    /// tool requests and results stay inside this request.
    pub async fn chat(&self, prompt: &str) -> Result<ChatOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ParleyError::Validation("Field 'prompt' is required".into()));
        }
        self.llm.ensure_configured()?;

        let started = Instant::now();
        let catalog = self.tools.catalog().await;
        self.compactor.wait_idle().await;
        let history = self.history.snapshot().await;
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ConversationTurn::system(build_system_prompt(
            &self.settings.system_prompt,
            &catalog,
        )));
        messages.extend(history);
        messages.push(ConversationTurn::user(prompt));

        let mut used_tools: Vec<String> = Vec::new();
        let mut rounds = 0u32;
        let mut round_limit_reached = false;
        let mut state = LoopState::AwaitingModel;

        let mut result = loop {
            state = match state {
                LoopState::AwaitingModel => {
                    let result = self
                        .llm
                        .complete(&messages, self.settings.temperature, self.settings.max_tokens)
                        .await?;
                    match parse_tool_directive(&result.answer_text) {
                        None => LoopState::Done(result),
                        Some(_) if rounds >= self.settings.max_rounds => {
                            warn!(rounds, "Tool round limit reached, returning last answer");
                            round_limit_reached = true;
                            LoopState::Done(result)
                        }
                        Some(directive) => LoopState::ToolRequested {
                            answer: result.answer_text,
                            directive,
                        },
                    }
                }
                LoopState::ToolRequested { answer, directive } => {
                    rounds += 1;
                    let outcome = self.run_tool(&catalog, &directive).await;
                    used_tools.push(directive.tool_name.clone());
                    messages.push(ConversationTurn::assistant(answer));
                    messages.push(ConversationTurn::user(tool_result_message(
                        &directive.tool_name,
                        &outcome,
                    )));
                    LoopState::AwaitingModel
                }
                LoopState::Done(result) => break result,
            };
        };

        result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if !used_tools.is_empty() {
            result.used_tool = Some(used_tools.join(", "));
        }

        self.history
            .append_all(vec![
                ConversationTurn::user(prompt),
                ConversationTurn::assistant(result.answer_text.clone()),
            ])
            .await;
        self.compactor.maybe_schedule().await;

        info!(
            rounds,
            round_limit_reached,
            elapsed_ms = result.elapsed_ms,
            used_tool = result.used_tool.as_deref().unwrap_or(""),
            "Chat completed"
        );
        Ok(ChatOutcome {
            result,
            rounds,
            round_limit_reached,
        })
    }

    /// Call the tool on the server that advertises it, or on the primary
    /// server. Errors come back as text for the model.
    async fn run_tool(
        &self,
        catalog: &[CatalogEntry],
        directive: &ToolCallDirective,
    ) -> std::result::Result<String, String> {
        let server_id = catalog
            .iter()
            .find(|entry| entry.tool.name == directive.tool_name)
            .map(|entry| entry.server_id.as_str())
            .or_else(|| self.tools.primary_id())
            .ok_or_else(|| "no tool servers are registered".to_string())?;

        debug!(server = %server_id, tool = %directive.tool_name, "Model requested tool");
        self.tools
            .call_tool(server_id, &directive.tool_name, &directive.parameters)
            .await
            .map_err(|e| {
                warn!(server = %server_id, tool = %directive.tool_name, %e, "Tool call failed");
                e.to_string()
            })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    use super::*;
    use crate::compaction::CompactionSettings;
    use crate::testing::{FakeTools, ScriptedLlm, empty_registry, registry_with};
    use parley_core::types::Role;

    fn settings(max_rounds: u32) -> OrchestratorSettings {
        OrchestratorSettings {
            system_prompt: "You are a smart AI assistant".into(),
            temperature: 0.3,
            max_tokens: 2000,
            max_rounds,
        }
    }

    fn orchestrator(
        llm: Arc<ScriptedLlm>,
        tools: Arc<ToolRegistry>,
        history: Arc<HistoryStore>,
        max_rounds: u32,
    ) -> Orchestrator {
        let compactor = Compactor::new(
            llm.clone(),
            history.clone(),
            CompactionSettings {
                max_turns: 100,
                ..Default::default()
            },
            TaskTracker::new(),
            CancellationToken::new(),
        );
        Orchestrator::new(llm, tools, history, compactor, settings(max_rounds))
    }

    #[tokio::test]
    async fn test_plain_answer_takes_one_call() {
        let llm = Arc::new(ScriptedLlm::answers(&["The answer is 42."]));
        let history = Arc::new(HistoryStore::in_memory());
        let orch = orchestrator(llm.clone(), empty_registry(), history.clone(), 5);

        let outcome = orch.chat("What is the answer?").await.unwrap();
        assert_eq!(llm.call_count(), 1);
        assert_eq!(outcome.result.answer_text, "The answer is 42.");
        assert_eq!(outcome.result.total_tokens, Some(10));
        assert_eq!(outcome.result.used_tool, None);
        assert_eq!(outcome.rounds, 0);
        assert!(!outcome.round_limit_reached);

        let call = llm.call(0);
        assert_eq!(call.temperature, 0.3);
        assert_eq!(call.max_tokens, 2000);
        assert_eq!(
            call.messages,
            vec![
                ConversationTurn::system("You are a smart AI assistant"),
                ConversationTurn::user("What is the answer?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let llm = Arc::new(ScriptedLlm::answers(&[
            r#"MCP_TOOL: {"name":"echo","parameters":{"x":1}}"#,
            "Echo said 1.",
        ]));
        let tools = Arc::new(FakeTools::default().with_tool("echo", Ok("x=1")));
        let history = Arc::new(HistoryStore::in_memory());
        let orch = orchestrator(llm.clone(), registry_with(tools.clone()), history, 5);

        let outcome = orch.chat("echo please").await.unwrap();
        assert_eq!(outcome.result.answer_text, "Echo said 1.");
        assert_eq!(outcome.result.used_tool.as_deref(), Some("echo"));
        assert_eq!(outcome.rounds, 1);

        let calls = tools.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://core/mcp");
        assert_eq!(calls[0].1, "echo");
        assert_eq!(calls[0].2, json!({"x": 1}));

        assert_eq!(llm.call_count(), 2);
        let second = llm.call(1);
        assert!(second.messages[0].text.contains("- name: echo"));
        let n = second.messages.len();
        assert_eq!(second.messages[n - 2].role, Role::Assistant);
        assert!(second.messages[n - 2].text.starts_with("MCP_TOOL:"));
        assert_eq!(second.messages[n - 1].role, Role::User);
        assert!(second.messages[n - 1].text.starts_with("Result of tool echo:\nx=1"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back() {
        let llm = Arc::new(ScriptedLlm::answers(&[
            "MCP_TOOL: broken",
            "Sorry, the tool is down.",
        ]));
        let tools = Arc::new(FakeTools::default().with_tool("broken", Err("backend unavailable")));
        let orch = orchestrator(
            llm.clone(),
            registry_with(tools),
            Arc::new(HistoryStore::in_memory()),
            5,
        );

        let outcome = orch.chat("try it").await.unwrap();
        assert_eq!(outcome.result.answer_text, "Sorry, the tool is down.");
        assert_eq!(outcome.result.used_tool.as_deref(), Some("broken"));
        let feedback = llm.call(1).messages.last().cloned().unwrap();
        assert!(feedback.text.starts_with("Tool broken failed:"));
        assert!(feedback.text.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_no_tool_servers_is_fed_back() {
        let llm = Arc::new(ScriptedLlm::answers(&["MCP_TOOL: anything", "Plain answer"]));
        let orch = orchestrator(
            llm.clone(),
            empty_registry(),
            Arc::new(HistoryStore::in_memory()),
            5,
        );
        let outcome = orch.chat("go").await.unwrap();
        assert_eq!(outcome.result.answer_text, "Plain answer");
        let feedback = llm.call(1).messages.last().cloned().unwrap();
        assert!(feedback.text.contains("no tool servers are registered"));
    }

    #[tokio::test]
    async fn test_round_cap() {
        let llm = Arc::new(ScriptedLlm::answers(&[]).with_fallback("MCP_TOOL: echo"));
        let tools = Arc::new(FakeTools::default().with_tool("echo", Ok("again")));
        let history = Arc::new(HistoryStore::in_memory());
        let orch = orchestrator(llm.clone(), registry_with(tools.clone()), history.clone(), 2);

        let outcome = orch.chat("loop forever").await.unwrap();
        assert!(outcome.round_limit_reached);
        assert_eq!(outcome.rounds, 2);
        assert_eq!(tools.calls().len(), 2);
        assert_eq!(llm.call_count(), 3);
        assert_eq!(outcome.result.answer_text, "MCP_TOOL: echo");
        assert_eq!(outcome.result.used_tool.as_deref(), Some("echo, echo"));
    }

    #[tokio::test]
    async fn test_only_user_turn_and_final_answer_are_persisted() {
        let llm = Arc::new(ScriptedLlm::answers(&["MCP_TOOL: echo", "Done."]));
        let tools = Arc::new(FakeTools::default().with_tool("echo", Ok("pong")));
        let history = Arc::new(HistoryStore::in_memory());
        let orch = orchestrator(llm, registry_with(tools), history.clone(), 5);

        orch.chat("  ping  ").await.unwrap();
        assert_eq!(
            history.snapshot().await,
            vec![ConversationTurn::user("ping"), ConversationTurn::assistant("Done.")]
        );
    }

    #[tokio::test]
    async fn test_history_is_replayed() {
        let llm = Arc::new(ScriptedLlm::answers(&["second answer"]));
        let history = Arc::new(HistoryStore::in_memory());
        history
            .append_all(vec![
                ConversationTurn::user("first"),
                ConversationTurn::assistant("first answer"),
            ])
            .await;
        let orch = orchestrator(llm.clone(), empty_registry(), history.clone(), 5);

        orch.chat("second").await.unwrap();
        let messages = llm.call(0).messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1], ConversationTurn::user("first"));
        assert_eq!(messages[2], ConversationTurn::assistant("first answer"));
        assert_eq!(messages[3], ConversationTurn::user("second"));
        assert_eq!(history.len().await, 4);
    }

    #[tokio::test]
    async fn test_blank_prompt_is_rejected() {
        let llm = Arc::new(ScriptedLlm::answers(&["unused"]));
        let orch = orchestrator(
            llm.clone(),
            empty_registry(),
            Arc::new(HistoryStore::in_memory()),
            5,
        );
        let err = orch.chat("   ").await.unwrap_err();
        assert!(matches!(err, ParleyError::Validation(_)));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_llm_error_propagates_and_nothing_is_stored() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err("overloaded".into())]));
        let history = Arc::new(HistoryStore::in_memory());
        let orch = orchestrator(llm, empty_registry(), history.clone(), 5);

        let err = orch.chat("hi").await.unwrap_err();
        assert!(matches!(err, ParleyError::Upstream { status: 500, .. }));
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_compaction_started_during_tool_listing_is_awaited() {
        let list_gate = Arc::new(Notify::new());
        let tools = Arc::new(FakeTools::default().with_list_gate(list_gate.clone()));
        let compaction_gate = Arc::new(Notify::new());
        let compaction_llm =
            Arc::new(ScriptedLlm::answers(&["summary"]).with_gate(compaction_gate.clone()));
        let chat_llm = Arc::new(ScriptedLlm::answers(&["fresh answer"]));
        let history = Arc::new(HistoryStore::in_memory());
        history
            .append_all(vec![ConversationTurn::user("old"), ConversationTurn::assistant("reply")])
            .await;
        let compactor = Compactor::new(
            compaction_llm.clone(),
            history.clone(),
            CompactionSettings {
                max_turns: 1,
                ..Default::default()
            },
            TaskTracker::new(),
            CancellationToken::new(),
        );
        let orch = Orchestrator::new(
            chat_llm.clone(),
            registry_with(tools.clone()),
            history.clone(),
            compactor.clone(),
            settings(5),
        );

        let driver = async {
            while tools.listing_count() == 0 {
                tokio::task::yield_now().await;
            }
            assert!(compactor.maybe_schedule().await);
            while compaction_llm.call_count() == 0 {
                tokio::task::yield_now().await;
            }
            list_gate.notify_one();
            compaction_gate.notify_one();
        };
        let (outcome, ()) = tokio::join!(orch.chat("next"), driver);
        outcome.unwrap();

        assert_eq!(
            chat_llm.call(0).messages[1..],
            [ConversationTurn::assistant("summary"), ConversationTurn::user("next")]
        );
    }

    #[tokio::test]
    async fn test_compaction_scheduled_after_chat() {
        let llm = Arc::new(ScriptedLlm::answers(&["answer", "summary"]));
        let history = Arc::new(HistoryStore::in_memory());
        let compactor = Compactor::new(
            llm.clone(),
            history.clone(),
            CompactionSettings {
                max_turns: 1,
                ..Default::default()
            },
            TaskTracker::new(),
            CancellationToken::new(),
        );
        let orch = Orchestrator::new(
            llm.clone(),
            empty_registry(),
            history.clone(),
            compactor.clone(),
            settings(5),
        );

        orch.chat("hello").await.unwrap();
        compactor.wait_idle().await;
        assert_eq!(history.snapshot().await, vec![ConversationTurn::assistant("summary")]);
        assert_eq!(llm.call_count(), 2);
    }
}

//! Gateway shared state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use parley_agent::{CompactionSettings, Compactor, IssueSummarizer, Orchestrator, OrchestratorSettings};
use parley_core::config::Config;
use parley_core::error::Result;
use parley_core::history::HistoryStore;
use parley_core::persona::Persona;
use parley_providers::{LlmClient, build_client};
use parley_tools::ToolRegistry;

use crate::events::SummaryHub;

/// Context object built once at startup and shared by the HTTP handlers,
/// the WebSocket connections and the background tasks.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub history: Arc<HistoryStore>,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolRegistry>,
    pub compactor: Arc<Compactor>,
    pub orchestrator: Orchestrator,
    pub summarizer: IssueSummarizer,
    pub hub: SummaryHub,
    pub persona: Persona,
    /// Cancelled on shutdown; every background task watches it.
    pub cancel: CancellationToken,
    pub tasks: TaskTracker,
}

impl GatewayState {
    pub fn new(
        config: Config,
        history: Arc<HistoryStore>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        let compactor = Compactor::new(
            llm.clone(),
            history.clone(),
            CompactionSettings {
                max_turns: config.max_turns(),
                temperature: config.compaction_temperature(),
                max_tokens: config.compaction_max_tokens(),
            },
            tasks.clone(),
            cancel.clone(),
        );
        let orchestrator = Orchestrator::new(
            llm.clone(),
            tools.clone(),
            history.clone(),
            compactor.clone(),
            OrchestratorSettings::from_config(&config),
        );
        let summarizer = IssueSummarizer::new(llm.clone(), tools.clone(), config.summary());

        Arc::new(Self {
            persona: config.persona(),
            config: Arc::new(config),
            history,
            llm,
            tools,
            compactor,
            orchestrator,
            summarizer,
            hub: SummaryHub::new(),
            cancel,
            tasks,
        })
    }

    /// Build the LLM client, tool registry and history store from config.
    pub async fn from_config(config: Config) -> Result<Arc<Self>> {
        let llm = build_client(&config.llm())?;
        let tools = Arc::new(ToolRegistry::from_config(&config));
        let history = Arc::new(HistoryStore::open(config.history_path()).await);
        Ok(Self::new(config, history, llm, tools))
    }
}

//! History compaction: collapse an oversized history into one summary turn.
//!
//! At most one compaction job runs at a time. Callers that read and extend
//! the history wait for a running job with [`Compactor::wait_idle`] first.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use parley_core::error::Result;
use parley_core::history::HistoryStore;
use parley_core::types::ConversationTurn;
use parley_providers::LlmClient;

pub const COMPACTION_SYSTEM_PROMPT: &str = "You compress conversation history without losing context. \
     Preserve facts, decisions, names and open questions.";

pub const COMPACTION_SUMMARY_PROMPT: &str = "Produce a concise summary of the prior dialogue that can \
     replace it as context for further conversation.";

#[derive(Debug, Clone, Copy)]
pub struct CompactionSettings {
    /// Compaction is scheduled once the history holds more turns than this.
    pub max_turns: usize,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            max_turns: 10,
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

pub struct Compactor {
    llm: Arc<dyn LlmClient>,
    history: Arc<HistoryStore>,
    settings: CompactionSettings,
    /// `true` while a job is in flight.
    busy: watch::Sender<bool>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

/// Clears the busy flag when the job ends, however it ends.
struct BusyGuard(Arc<Compactor>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.send_replace(false);
    }
}

impl Compactor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        history: Arc<HistoryStore>,
        settings: CompactionSettings,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (busy, _) = watch::channel(false);
        Arc::new(Self {
            llm,
            history,
            settings,
            busy,
            tasks,
            cancel,
        })
    }

    pub fn settings(&self) -> CompactionSettings {
        self.settings
    }

    pub fn is_running(&self) -> bool {
        *self.busy.borrow()
    }

    /// Start a compaction job if the history is over the limit and no job
    /// is running. Returns `true` if a job was started.
    pub async fn maybe_schedule(self: &Arc<Self>) -> bool {
        let len = self.history.len().await;
        if len <= self.settings.max_turns {
            return false;
        }

        let Some(guard) = self.try_claim() else {
            debug!(len, "Compaction already in flight");
            return false;
        };

        info!(len, max_turns = self.settings.max_turns, "History over limit, scheduling compaction");
        self.spawn_job(guard);
        true
    }

    fn try_claim(self: &Arc<Self>) -> Option<BusyGuard> {
        let claimed = self.busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        claimed.then(|| BusyGuard(self.clone()))
    }

    fn spawn_job(self: &Arc<Self>, guard: BusyGuard) {
        let this = self.clone();
        self.tasks.spawn(async move {
            let mut guard = guard;
            loop {
                let merged = tokio::select! {
                    _ = this.cancel.cancelled() => {
                        debug!("Compaction cancelled");
                        return;
                    }
                    outcome = this.compact() => match outcome {
                        Ok(merged) => {
                            if !merged {
                                debug!("Compaction made no change");
                            }
                            merged
                        }
                        Err(e) => {
                            warn!(%e, "Compaction failed, history left as-is");
                            false
                        }
                    }
                };
                drop(guard);

                // Appends that landed while the job ran could not schedule one.
                if !merged || this.cancel.is_cancelled() {
                    return;
                }
                let len = this.history.len().await;
                if len <= this.settings.max_turns {
                    return;
                }
                match this.try_claim() {
                    Some(next) => {
                        info!(len, "History still over limit after compaction, running again");
                        guard = next;
                    }
                    None => return,
                }
            }
        });
    }

    /// Wait until no compaction job is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Summarize the current history and merge the summary back.
    ///
    /// Returns `Ok(false)` when nothing was replaced: the history is within
    /// the limit, the summary was blank, or the history was cleared meanwhile.
    async fn compact(&self) -> Result<bool> {
        let (turns, mark) = self.history.snapshot_marked().await;
        if turns.len() <= self.settings.max_turns {
            return Ok(false);
        }

        let mut messages = Vec::with_capacity(turns.len() + 2);
        messages.push(ConversationTurn::system(COMPACTION_SYSTEM_PROMPT));
        messages.extend(turns);
        messages.push(ConversationTurn::user(COMPACTION_SUMMARY_PROMPT));

        let result = self
            .llm
            .complete(&messages, self.settings.temperature, self.settings.max_tokens)
            .await?;
        let summary = result.answer_text.trim();
        if summary.is_empty() {
            warn!("Compaction produced empty summary, keeping history as-is");
            return Ok(false);
        }

        if !self
            .history
            .replace_prefix(mark, vec![ConversationTurn::assistant(summary)])
            .await
        {
            info!("History was replaced during compaction, discarding summary");
            return Ok(false);
        }

        info!(summarized = mark.len(), summary_chars = summary.len(), "Compaction complete");
        Ok(true)
    }
}

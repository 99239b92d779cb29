//! Conversation orchestration on top of the LLM client and tool registry.
//!
//! - [`directive`] parses tool-call requests out of model answers.
//! - [`orchestrator`] runs the bounded tool-use loop for one chat request.
//! - [`compaction`] collapses an oversized history into a summary turn.
//! - [`summary`] turns issue comments fetched through a tool into a digest.

pub mod compaction;
pub mod directive;
pub mod orchestrator;
pub mod prompt;
pub mod summary;

pub use compaction::{CompactionSettings, Compactor};
pub use directive::{TOOL_MARKER, ToolCallDirective, parse_tool_directive};
pub use orchestrator::{ChatOutcome, Orchestrator, OrchestratorSettings};
pub use summary::IssueSummarizer;

#[cfg(test)]
pub(crate) mod testing;

//! Issue summary: fetch recent issue comments through a tool and have the
//! model summarize them.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use parley_core::config::SummaryConfig;
use parley_core::error::Result;
use parley_core::types::{ConversationTurn, ToolParams, ToolValue};
use parley_providers::LlmClient;
use parley_tools::ToolRegistry;

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You summarize the current GitHub issues based on the comments you receive";

const DIGEST_HEADER: &str = "Comments on active issues:";

#[derive(Debug, Clone, PartialEq)]
pub struct IssueComment {
    pub id: i64,
    pub issue_number: Option<u64>,
    pub author: String,
    pub body: String,
    pub created_at: Option<String>,
}

/// Parse a GitHub issue-comments payload. Returns `None` if `raw` is not a
/// JSON array. At most `limit` entries are inspected.
pub fn parse_issue_comments(raw: &str, limit: usize) -> Option<Vec<IssueComment>> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    let items = value.as_array()?;

    let comments = items
        .iter()
        .take(limit)
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_i64).unwrap_or(0);
            if id <= 0 {
                return None;
            }
            let body = item.get("body").and_then(Value::as_str).unwrap_or("").trim();
            if body.is_empty() {
                return None;
            }
            let issue_number = item
                .get("issue_url")
                .and_then(Value::as_str)
                .and_then(|url| url.rsplit_once("/issues/"))
                .and_then(|(_, n)| n.parse().ok());
            let author = item
                .pointer("/user/login")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let created_at = item
                .get("created_at")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string);
            Some(IssueComment {
                id,
                issue_number,
                author,
                body: body.to_string(),
                created_at,
            })
        })
        .collect();
    Some(comments)
}

/// Collapse whitespace runs and cut to `max_chars` characters, adding `...`
/// when cut.
pub fn normalize_body(body: &str, max_chars: usize) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Numbered digest of comments, one block per comment.
pub fn build_digest(comments: &[IssueComment], max_body_chars: usize) -> String {
    let mut digest = format!("{DIGEST_HEADER}\n");
    for (i, comment) in comments.iter().enumerate() {
        let number = comment
            .issue_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".into());
        digest.push_str(&format!("{}. Issue #{number}", i + 1));
        if !comment.author.is_empty() {
            digest.push_str(&format!(" ({})", comment.author));
        }
        if let Some(created) = &comment.created_at {
            digest.push_str(&format!(" - {created}"));
        }
        digest.push_str(":\n");
        digest.push_str(&normalize_body(&comment.body, max_body_chars));
        digest.push_str("\n\n");
    }
    digest.trim().to_string()
}

pub struct IssueSummarizer {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: SummaryConfig,
}

impl IssueSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: SummaryConfig) -> Self {
        Self { llm, tools, config }
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// Fetch comments and build the digest. `None` when there is nothing to
    /// summarize.
    pub async fn fetch_digest(&self) -> Result<Option<String>> {
        let Some(server_id) = self
            .config
            .server_id
            .as_deref()
            .or_else(|| self.tools.primary_id())
        else {
            debug!("No tool server for issue summary");
            return Ok(None);
        };

        let mut params = ToolParams::new();
        params.insert(
            "per_page".into(),
            ToolValue::from(i64::from(self.config.per_page)),
        );
        let raw = self
            .tools
            .call_tool(server_id, &self.config.tool_name, &params)
            .await?;

        let limit = self.config.per_page as usize;
        let digest = match parse_issue_comments(&raw, limit) {
            Some(comments) if comments.is_empty() => return Ok(None),
            Some(comments) => build_digest(&comments, self.config.max_body_chars),
            None => {
                warn!(tool = %self.config.tool_name, "Issue payload is not a JSON array, using raw text");
                let text = normalize_body(&raw, self.config.max_body_chars);
                if text.is_empty() {
                    return Ok(None);
                }
                format!("{DIGEST_HEADER}\n{text}")
            }
        };
        Ok(Some(digest))
    }

    /// Run one refresh cycle. Returns the summary text, or `None` when there
    /// was nothing to summarize or the model answered with blank text.
    pub async fn summarize(&self) -> Result<Option<String>> {
        let Some(digest) = self.fetch_digest().await? else {
            return Ok(None);
        };

        let messages = [
            ConversationTurn::system(SUMMARY_SYSTEM_PROMPT),
            ConversationTurn::user(digest),
        ];
        let result = self
            .llm
            .complete(&messages, self.config.temperature, self.config.max_tokens)
            .await?;
        let answer = result.answer_text.trim();
        if answer.is_empty() {
            debug!("Issue summary answer was empty");
            return Ok(None);
        }
        info!(chars = answer.len(), "Issue summary updated");
        Ok(Some(answer.to_string()))
    }
}

//! Retrieval-augmented answers about a processed page.
//!
//! [`answer`] never fails. Each stage (question embedding, retrieval, issue
//! lookup, completion) degrades to whatever the earlier stages produced:
//!
//! | Failure | Result |
//! |---------|--------|
//! | provider disabled | [`CHAT_DISABLED`] |
//! | no content and no issues | [`NO_CONTENT`] |
//! | completion error with content | best retrieved excerpt |
//! | completion error without content | [`GENERIC_FAILURE`] |
//!
//! The optional page summary ([`summarize_page`]) lives here as well, since
//! it is the same single-prompt completion over page text.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::ai::{AiClient, CompletionRequest};
use crate::index::truncate_chars;
use crate::models::{Chunk, ChunkRole, IssueType, Severity};
use crate::retrieve::Retriever;
use crate::store::{ChunkHit, IssueRecord, Store};

pub const CHAT_DISABLED: &str = "Chat is disabled (no API key configured).";
pub const NO_CONTENT: &str = "I couldn't find content to answer that on this page.";
pub const GENERIC_FAILURE: &str =
    "Sorry, I couldn't answer that right now. Please try again later.";

const EXCERPT_CHARS: usize = 500;
const SUMMARY_INPUT_CHARS: usize = 10_000;
const SUMMARY_PROMPT_CHARS: usize = 8_000;
const SUMMARY_MAX_TOKENS: u32 = 250;

/// Completion parameters and retrieval breadth for chat.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: usize,
    pub max_context_chars: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 400,
            top_k: 8,
            max_context_chars: 8000,
        }
    }
}

/// Everything [`answer`] needs, assembled once at startup.
#[derive(Clone)]
pub struct ChatContext {
    pub ai: Arc<dyn AiClient>,
    pub store: Arc<dyn Store>,
    pub retriever: Arc<dyn Retriever>,
    pub settings: ChatSettings,
}

/// Answer `question` about page `page_id` using only its stored content.
pub async fn answer(ctx: &ChatContext, page_id: &str, question: &str) -> String {
    if !ctx.ai.is_enabled() {
        return CHAT_DISABLED.to_string();
    }

    let query = match ctx.ai.embed_batch(&[question.to_string()]).await {
        Ok(mut vectors) if vectors.len() == 1 => vectors.pop(),
        Ok(vectors) => {
            warn!(got = vectors.len(), "question embedding returned unexpected batch size");
            None
        }
        Err(e) => {
            warn!(error = %e, "question embedding failed");
            None
        }
    };

    let k = ctx.settings.top_k;
    let mut hits = ctx
        .retriever
        .retrieve(page_id, query.as_deref(), k)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "retrieval failed");
            Vec::new()
        });
    let strategy = ctx.retriever.strategy();
    if hits.is_empty() && query.is_none() && strategy.without_query() != strategy {
        let fallback = strategy.without_query();
        debug!(%fallback, "no query vector, retrying with fallback strategy");
        hits = fallback
            .build(ctx.store.clone())
            .retrieve(page_id, None, k)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "fallback retrieval failed");
                Vec::new()
            });
    }

    let issues = ctx.store.list_issues(page_id).await.unwrap_or_else(|e| {
        warn!(error = %e, "issue lookup failed");
        Vec::new()
    });

    let context = build_context(&hits, ctx.settings.max_context_chars);
    if context.is_empty() && issues.is_empty() {
        return NO_CONTENT.to_string();
    }

    let prompt = chat_prompt(&context, &issue_summary(&issues), question);
    let request =
        CompletionRequest::new(prompt, ctx.settings.temperature, ctx.settings.max_tokens);
    match ctx.ai.complete(&request).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => fallback_answer(&hits),
        Err(e) => {
            warn!(error = %e, "chat completion failed");
            fallback_answer(&hits)
        }
    }
}

/// Chunk texts joined with blank lines, capped at `max_chars`.
pub fn build_context(hits: &[ChunkHit], max_chars: usize) -> String {
    let joined = hits
        .iter()
        .map(|h| h.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    truncate_chars(&joined, max_chars).to_string()
}

/// One line per issue type present: `TYPE (SEVERITY): count`.
pub fn issue_summary(issues: &[IssueRecord]) -> String {
    if issues.is_empty() {
        return "No accessibility issues were recorded for this page.".to_string();
    }
    let mut counts: BTreeMap<IssueType, (Severity, usize)> = BTreeMap::new();
    for issue in issues {
        counts
            .entry(issue.issue_type)
            .or_insert((issue.severity, 0))
            .1 += 1;
    }
    counts
        .iter()
        .map(|(t, (severity, n))| format!("{} ({}): {}", t, severity, n))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn chat_prompt(context: &str, issues: &str, question: &str) -> String {
    format!(
        "Answer the user's question using only the provided page content.\n\n\
         CONTENT:\n{}\n\n\
         ACCESSIBILITY ISSUES:\n{}\n\n\
         QUESTION: {}\n\n\
         ANSWER:",
        context, issues, question
    )
}

fn fallback_answer(hits: &[ChunkHit]) -> String {
    match hits.iter().find(|h| !h.text.trim().is_empty()) {
        Some(best) => format!(
            "I couldn't generate an answer right now. The most relevant content on this page is:\n\n{}",
            truncate_chars(best.text.trim(), EXCERPT_CHARS)
        ),
        None => GENERIC_FAILURE.to_string(),
    }
}

/// Short bulleted summary of the page for a screen-reader user.
///
/// Returns `None` when there is no text or the completion fails.
pub async fn summarize_page(ai: &dyn AiClient, chunks: &[Chunk]) -> Option<String> {
    if !ai.is_enabled() {
        return None;
    }
    let text = chunks
        .iter()
        .filter(|c| c.role != ChunkRole::Document)
        .map(|c| c.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let text = truncate_chars(&text, SUMMARY_INPUT_CHARS);
    if text.is_empty() {
        return None;
    }

    let prompt = format!(
        "Summarize the page for a visually impaired reader in 4\u{2013}6 clear bullets. \
         Be concise and factual.\n\nCONTENT:\n{}",
        truncate_chars(text, SUMMARY_PROMPT_CHARS)
    );
    match ai
        .complete(&CompletionRequest::new(prompt, 0.2, SUMMARY_MAX_TOKENS))
        .await
    {
        Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "page summary failed");
            None
        }
    }
}

//! Page chat for the CLI and server.
//!
//! Builds the [`ChatContext`] from configuration and answers questions
//! through [`a11y_harness_core::chat::answer`].

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

use a11y_harness_core::ai::AiClient;
use a11y_harness_core::chat::{answer, ChatContext};
use a11y_harness_core::store::Store;

use crate::ai::create_client;
use crate::config::Config;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

/// Assemble the chat context; the retriever comes from `retrieval.strategy`.
pub fn chat_context(config: &Config, store: Arc<dyn Store>, ai: Arc<dyn AiClient>) -> ChatContext {
    ChatContext {
        retriever: config.retrieval.strategy.build(store.clone()),
        ai,
        store,
        settings: config.chat.settings(),
    }
}

/// Answer `question` about a stored page.
///
/// Fails only for an empty question or an unknown page; everything past
/// that degrades inside [`answer`].
pub async fn ask(ctx: &ChatContext, page_id: &str, question: &str) -> Result<ChatResponse> {
    let question = question.trim();
    if question.is_empty() {
        bail!("question must not be empty");
    }
    if ctx.store.get_page(page_id).await?.is_none() {
        bail!("page not found: {}", page_id);
    }
    Ok(ChatResponse {
        answer: answer(ctx, page_id, question).await,
    })
}

/// CLI entry point for `a11y chat`.
pub async fn run_chat(config: &Config, page_id: &str, question: &str) -> Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let ai = create_client(config)?;
    let ctx = chat_context(config, store.clone(), ai);

    let response = ask(&ctx, page_id, question).await;
    store.close().await;

    println!("{}", response?.answer);
    Ok(())
}

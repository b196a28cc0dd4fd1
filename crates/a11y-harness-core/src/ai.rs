//! AI client interface.
//!
//! The pipeline needs two capabilities from a model provider: batched text
//! embeddings and short text completions. Both sit behind [`AiClient`] so
//! the core crate stays free of HTTP code; concrete clients (OpenAI, Ollama,
//! a disabled placeholder) live in the `a11y-harness` app crate, and tests
//! plug in fakes.

use anyhow::Result;
use async_trait::async_trait;

/// A single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            max_tokens,
        }
    }
}

/// Embedding + completion provider.
///
/// Callers treat every error as recoverable: alt text, embeddings, chat and
/// summaries all have documented fallbacks.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Model identifier stored next to each vector (e.g. `"text-embedding-3-small"`).
    fn embedding_model(&self) -> &str;

    /// Embedding dimensionality.
    fn dims(&self) -> usize;

    /// Whether the client can serve requests at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Embed a batch of texts. The response has one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Complete a prompt, returning the model's text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

//! Concrete [`AiClient`] implementations.
//!
//! - **[`DisabledClient`]**: refuses every request; used when
//!   `embedding.provider = "disabled"` or no OpenAI key is available.
//! - **[`OpenAiClient`]**: `POST /v1/embeddings` and `POST /v1/chat/completions`.
//! - **[`OllamaClient`]**: `POST /api/embed` and `POST /api/chat` on a local
//!   Ollama instance.
//!
//! # Retry Strategy
//!
//! Both network clients share [`post_json`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use a11y_harness_core::ai::{AiClient, CompletionRequest};

use crate::config::Config;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const SYSTEM_PROMPT: &str =
    "You are a concise web accessibility assistant. Follow the instructions in the user message exactly.";

/// Build the client described by `[embedding]` and `[chat]`.
///
/// The OpenAI key is read from `OPENAI_API_KEY`; without it the OpenAI
/// provider degrades to [`DisabledClient`] with a warning.
pub fn create_client(config: &Config) -> Result<Arc<dyn AiClient>> {
    let key = std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    create_client_with_key(config, key)
}

pub fn create_client_with_key(
    config: &Config,
    openai_key: Option<String>,
) -> Result<Arc<dyn AiClient>> {
    match config.embedding.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClient)),
        "openai" => match openai_key {
            Some(key) => Ok(Arc::new(OpenAiClient::new(config, key)?)),
            None => {
                warn!("OPENAI_API_KEY not set; AI features are disabled");
                Ok(Arc::new(DisabledClient))
            }
        },
        "ollama" => Ok(Arc::new(OllamaClient::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// A client that is never enabled. Every request fails.
pub struct DisabledClient;

#[async_trait]
impl AiClient for DisabledClient {
    fn embedding_model(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("AI provider is disabled")
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        bail!("AI provider is disabled")
    }
}

// ============ Shared HTTP ============

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build AI HTTP client")
}

/// Delay before retry number `attempt` (1-based).
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// POST `body` as JSON and return the parsed JSON response, retrying
/// transient failures.
async fn post_json<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &B,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            debug!(attempt, delay_secs = delay.as_secs(), "{} retry", label);
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key.trim());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return Ok(json);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429): fail now
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", label)))
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn messages(prompt: &str) -> Vec<ChatMessage<'_>> {
    vec![
        ChatMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        },
        ChatMessage {
            role: "user",
            content: prompt,
        },
    ]
}

// ============ OpenAI ============

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    embedding_model: String,
    dims: usize,
    chat_model: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(config: &Config, api_key: String) -> Result<Self> {
        let embedding_model = config
            .embedding
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .embedding
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;

        Ok(Self {
            client: http_client(config.embedding.timeout_secs)?,
            api_key,
            embedding_model,
            dims,
            chat_model: config.chat.model.clone(),
            max_retries: config.embedding.max_retries,
        })
    }
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl AiClient for OpenAiClient {
    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let json = post_json(
            &self.client,
            "OpenAI",
            &format!("{}/embeddings", OPENAI_BASE),
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        parse_openai_embeddings(&json)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = OpenAiChatRequest {
            model: &self.chat_model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: messages(&request.prompt),
        };
        let json = post_json(
            &self.client,
            "OpenAI",
            &format!("{}/chat/completions", OPENAI_BASE),
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        parse_openai_chat(json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_f32(embedding)));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_openai_chat(json: serde_json::Value) -> Result<String> {
    let parsed: OpenAiChatResponse =
        serde_json::from_value(json).context("failed to parse OpenAI chat response")?;
    parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| anyhow!("OpenAI chat response has no content"))
}

// ============ Ollama ============

pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    embedding_model: String,
    dims: usize,
    chat_model: String,
    max_retries: u32,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let embedding_model = config
            .embedding
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .embedding
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .embedding
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config.embedding.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            embedding_model,
            dims,
            chat_model: config.chat.model.clone(),
            max_retries: config.embedding.max_retries,
        })
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: AssistantMessage,
}

#[async_trait]
impl AiClient for OllamaClient {
    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let json = post_json(
            &self.client,
            "Ollama",
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
        )
        .await?;
        parse_ollama_embeddings(&json)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = OllamaChatRequest {
            model: &self.chat_model,
            messages: messages(&request.prompt),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        let json = post_json(
            &self.client,
            "Ollama",
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.max_retries,
        )
        .await?;
        parse_ollama_chat(json)
    }
}

fn parse_ollama_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn parse_ollama_chat(json: serde_json::Value) -> Result<String> {
    let parsed: OllamaChatResponse =
        serde_json::from_value(json).context("failed to parse Ollama chat response")?;
    parsed
        .message
        .content
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| anyhow!("Ollama chat response has no content"))
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

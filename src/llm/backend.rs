use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, Provider};
use crate::error::{RagError, RagResult};
use crate::llm::query_expand::sanitize_for_prompt;
use crate::llm::retry::{retry_with_timeout, RetryPolicy};
use crate::models::{ChatMessage, Role, Turn};

/// Most recent memory turns forwarded to the backend with each prompt.
pub const MAX_HISTORY_TURNS: usize = 10;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Capability handle to a language-model inference endpoint.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap reachability probe used during initialization.
    async fn health_check(&self) -> Result<()>;

    /// Stream the answer to `prompt`, with `memory` supplying dialogue context.
    async fn generate_stream(&self, prompt: &str, memory: &[Turn]) -> Result<TokenStream>;

    /// Single-shot completion without dialogue context.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut stream = self.generate_stream(prompt, &[]).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }
}

/// Convert memory plus the rendered prompt into the backend message list.
pub fn messages_for(prompt: &str, memory: &[Turn]) -> Vec<ChatMessage> {
    let skip = memory.len().saturating_sub(MAX_HISTORY_TURNS);
    let mut messages: Vec<ChatMessage> = memory[skip..]
        .iter()
        .map(|t| ChatMessage::new(t.role, sanitize_for_prompt(&t.text)))
        .collect();
    messages.push(ChatMessage::new(Role::User, prompt));
    messages
}

/// Build the configured chat backend and wait until it answers its health check.
///
/// Unknown providers fail before any network call.
pub async fn connect_backend(
    client: reqwest::Client,
    config: &LlmConfig,
    policy: RetryPolicy,
) -> RagResult<Arc<dyn LanguageModel>> {
    let backend = HttpChatBackend::new(client, config.clone())?;
    let name = format!("LLM {} at {}", config.chat_model, config.base_url);
    retry_with_timeout(&name, policy, || backend.health_check()).await?;
    Ok(Arc::new(backend))
}

/// Chat backend speaking the Ollama or OpenAI-compatible HTTP API.
pub struct HttpChatBackend {
    client: reqwest::Client,
    config: LlmConfig,
    provider: Provider,
}

impl HttpChatBackend {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> RagResult<Self> {
        let provider = Provider::parse(&config.provider)?;
        if provider == Provider::Hashing {
            return Err(RagError::Configuration(
                "the hashing provider only supplies embeddings, not chat".to_string(),
            ));
        }
        Ok(Self {
            client,
            config,
            provider,
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.api_key.as_deref().unwrap_or(""))
    }
}

#[async_trait]
impl LanguageModel for HttpChatBackend {
    fn name(&self) -> &str {
        &self.config.chat_model
    }

    async fn health_check(&self) -> Result<()> {
        let req = match self.provider {
            Provider::OpenAi => self
                .client
                .get(format!("{}/v1/models", self.config.base_url))
                .header("Authorization", self.bearer()),
            _ => self
                .client
                .get(format!("{}/api/tags", self.config.base_url)),
        };

        let resp = req
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Failed to reach LLM endpoint")?;

        if !resp.status().is_success() {
            anyhow::bail!("LLM health check returned {}", resp.status());
        }
        Ok(())
    }

    async fn generate_stream(&self, prompt: &str, memory: &[Turn]) -> Result<TokenStream> {
        let messages = messages_for(prompt, memory);
        match self.provider {
            Provider::OpenAi => stream_openai(self, messages).await,
            _ => stream_ollama(self, messages).await,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let messages = vec![ChatMessage::new(Role::User, prompt)];
        match self.provider {
            Provider::OpenAi => call_openai(self, messages).await,
            _ => call_ollama(self, messages).await,
        }
    }
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: OllamaMessage,
    done: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

fn ollama_request(backend: &HttpChatBackend, messages: Vec<ChatMessage>, stream: bool) -> OllamaChatRequest {
    OllamaChatRequest {
        model: backend.config.chat_model.clone(),
        messages,
        stream,
        options: OllamaOptions {
            temperature: backend.config.temperature,
        },
    }
}

async fn stream_ollama(backend: &HttpChatBackend, messages: Vec<ChatMessage>) -> Result<TokenStream> {
    let url = format!("{}/api/chat", backend.config.base_url);

    let resp = backend
        .client
        .post(&url)
        .json(&ollama_request(backend, messages, true))
        .send()
        .await
        .context("Failed to connect to Ollama for chat streaming")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let stream = stream_lines(resp.bytes_stream()).filter_map(|line_result| async move {
        match line_result {
            Ok(line) => parse_ollama_line(&line),
            Err(e) => Some(Err(e)),
        }
    });

    Ok(Box::pin(stream))
}

async fn call_ollama(backend: &HttpChatBackend, messages: Vec<ChatMessage>) -> Result<String> {
    let url = format!("{}/api/chat", backend.config.base_url);

    let resp = backend
        .client
        .post(&url)
        .json(&ollama_request(backend, messages, false))
        .send()
        .await
        .context("Failed to call Ollama chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let body: OllamaChatResponse = resp.json().await?;
    Ok(body.message.content)
}

/// Parse a single Ollama streaming line. Returns:
/// - Some(Ok(content)) for content deltas
/// - Some(Err(e)) for parse errors
/// - None to skip (empty content or done signal)
fn parse_ollama_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<OllamaStreamChunk>(line) {
        Ok(chunk) => {
            if chunk.done {
                return None;
            }
            let content = chunk.message.content;
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse Ollama chunk: {e}"))),
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

fn openai_request(backend: &HttpChatBackend, messages: Vec<ChatMessage>, stream: bool) -> OpenAiChatRequest {
    OpenAiChatRequest {
        model: backend.config.chat_model.clone(),
        messages,
        stream,
        temperature: backend.config.temperature,
    }
}

async fn stream_openai(backend: &HttpChatBackend, messages: Vec<ChatMessage>) -> Result<TokenStream> {
    let url = format!("{}/v1/chat/completions", backend.config.base_url);

    let resp = backend
        .client
        .post(&url)
        .header("Authorization", backend.bearer())
        .json(&openai_request(backend, messages, true))
        .send()
        .await
        .context("Failed to connect to OpenAI for chat streaming")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let stream = stream_lines(resp.bytes_stream()).filter_map(|line_result| async move {
        match line_result {
            Ok(line) => parse_openai_line(&line),
            Err(e) => Some(Err(e)),
        }
    });

    Ok(Box::pin(stream))
}

async fn call_openai(backend: &HttpChatBackend, messages: Vec<ChatMessage>) -> Result<String> {
    let url = format!("{}/v1/chat/completions", backend.config.base_url);

    let resp = backend
        .client
        .post(&url)
        .header("Authorization", backend.bearer())
        .json(&openai_request(backend, messages, false))
        .send()
        .await
        .context("Failed to call OpenAI chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp.json().await?;
    Ok(body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

/// Parse a single OpenAI SSE line. Returns:
/// - Some(Ok(content)) for content deltas
/// - Some(Err(e)) for parse errors
/// - None to skip (empty lines, [DONE], role-only chunks)
fn parse_openai_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let data = if let Some(d) = line.strip_prefix("data: ") {
        d.trim()
    } else {
        return None;
    };

    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.clone())
                .unwrap_or_default();
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse OpenAI chunk: {e}"))),
    }
}

// ─── Line buffering ──────────────────────────────────────

/// Convert a byte stream into a stream of complete lines.
fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    futures_util::stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                // Split on raw bytes so multi-byte characters spanning two reads stay intact
                if let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&line).trim_end().to_string();
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        return Some((
                            Err(anyhow::anyhow!("Stream read error: {e}")),
                            (stream, buffer),
                        ));
                    }
                    None => {
                        if !buffer.iter().all(u8::is_ascii_whitespace) {
                            let remaining = String::from_utf8_lossy(&buffer).to_string();
                            buffer.clear();
                            return Some((Ok(remaining), (stream, buffer)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

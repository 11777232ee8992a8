use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, Provider};
use crate::error::RagResult;
use crate::llm::retry::{retry_with_timeout, RetryPolicy};

/// Maximum characters to send per text to the embedding API.
/// nomic-embed-text has an 8 192-token context; 3 000 chars stays well inside it
/// even for dense content. Ollama's `truncate: true` does not always prevent a 400.
const MAX_EMBED_CHARS: usize = 3_000;

/// Capability handle mapping text to fixed-length vectors.
///
/// Implementations must be deterministic for identical input and return
/// L2-normalised vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    async fn health_check(&self) -> Result<()>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results.into_iter().next().context("No embedding returned")
    }
}

/// Build the configured embedder and wait until it is reachable.
pub async fn connect_embedder(
    client: reqwest::Client,
    config: &EmbeddingConfig,
    policy: RetryPolicy,
) -> RagResult<Arc<dyn Embedder>> {
    match Provider::parse(&config.provider)? {
        Provider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dim))),
        provider => {
            let embedder = HttpEmbedder {
                client,
                config: config.clone(),
                provider,
            };
            let name = format!("embedding model {} at {}", config.model, config.base_url);
            retry_with_timeout(&name, policy, || embedder.health_check()).await?;
            Ok(Arc::new(embedder))
        }
    }
}

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ─── HTTP embedder ───────────────────────────────────────

pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
    provider: Provider,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dim(&self) -> usize {
        self.config.dim
    }

    async fn health_check(&self) -> Result<()> {
        // A one-word embedding proves both the server and the model are loaded.
        let v = self.embed("ping").await?;
        if v.is_empty() {
            anyhow::bail!("embedding endpoint returned an empty vector");
        }
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t).to_string())
            .collect();

        let mut embeddings = match self.provider {
            Provider::OpenAi => embed_openai(&self.client, &self.config, &truncated).await?,
            _ => embed_ollama(&self.client, &self.config, &truncated).await?,
        };
        for v in embeddings.iter_mut() {
            l2_normalize(v);
        }
        Ok(embeddings)
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url);

    let batch_size = 32;
    let mut all_embeddings = Vec::new();

    for chunk in texts.chunks(batch_size) {
        let req = OllamaEmbedRequest {
            model: config.model.clone(),
            input: chunk.to_vec(),
            truncate: true,
        };

        let resp = client
            .post(&url)
            .timeout(Duration::from_secs(60))
            .json(&req)
            .send()
            .await
            .context("Failed to call Ollama embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama embed API returned {status}: {body}");
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama embed response")?;

        all_embeddings.extend(body.embeddings);
    }

    Ok(all_embeddings)
}

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let batch_size = 64;
    let mut all_embeddings = Vec::new();

    for chunk in texts.chunks(batch_size) {
        let req = OpenAiEmbedRequest {
            model: config.model.clone(),
            input: chunk.to_vec(),
        };

        let resp = client
            .post(&url)
            .timeout(Duration::from_secs(60))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&req)
            .send()
            .await
            .context("Failed to call OpenAI embed API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI embed API returned {status}: {body}");
        }

        let body: OpenAiEmbedResponse = resp
            .json()
            .await
            .context("Failed to parse OpenAI embed response")?;

        all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
    }

    Ok(all_embeddings)
}

// ─── Offline hashing embedder ────────────────────────────

/// Deterministic bag-of-words embedder. Terms are FNV-1a hashed into
/// `dim` buckets and weighted by frequency; needs no model server.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, term: &str) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % self.dim as u64) as usize
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut tf: HashMap<String, f32> = HashMap::new();
        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() >= 2)
        {
            *tf.entry(term.to_lowercase()).or_default() += 1.0;
        }

        let mut v = vec![0.0f32; self.dim];
        for (term, count) in &tf {
            v[self.bucket(term)] += count;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

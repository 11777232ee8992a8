//! In-crate test doubles.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::llm::backend::{LanguageModel, TokenStream};
use crate::llm::embeddings::{Embedder, HashingEmbedder};
use crate::models::{Passage, Turn};
use crate::retrieval::RetrievalContext;
use crate::search::vector::VectorStore;

pub const DIM: usize = 256;

/// Language model that replays scripted completions and stream chunks.
#[derive(Default)]
pub struct ScriptedModel {
    completions: Mutex<VecDeque<String>>,
    chunks: Vec<String>,
    fail_stream: bool,
    pub prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(self, text: &str) -> Self {
        self.completions.lock().push_back(text.to_string());
        self
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// End the token stream with an error after the scripted chunks.
    pub fn with_stream_failure(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn generate_stream(&self, prompt: &str, _memory: &[Turn]) -> Result<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        let mut items: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
        if self.fail_stream {
            items.push(Err(anyhow::anyhow!("connection reset")));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        self.completions
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted completion left"))
    }
}

pub fn embedder() -> Arc<HashingEmbedder> {
    Arc::new(HashingEmbedder::new(DIM))
}

/// Embed and store `passages` in a fresh in-memory index.
pub async fn indexed(passages: Vec<Passage>) -> Arc<VectorStore> {
    let embedder = embedder();
    let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
    let vectors = embedder.embed_batch(&texts).await.unwrap();
    let store = VectorStore::in_memory();
    store
        .add_passages(
            passages
                .into_iter()
                .zip(vectors)
                .map(|(p, v)| p.with_vector(v))
                .collect(),
        )
        .unwrap();
    Arc::new(store)
}

pub fn transit_corpus() -> Vec<Passage> {
    vec![
        Passage::new("hours", "The ticket office opening hours are 7:00 to 19:00 on weekdays.")
            .with_metadata("source", "https://example.org/office")
            .with_metadata("type", "info"),
        Passage::new("fares", "A single bus fare costs 1.50 euro and a daily pass costs 6 euro.")
            .with_metadata("source", "https://example.org/fares")
            .with_metadata("type", "price"),
        Passage::new("night", "Night bus lines run from midnight until 5:00 on weekends.")
            .with_metadata("source", "https://example.org/night")
            .with_metadata("type", "timetable"),
    ]
}

pub async fn context(model: Arc<ScriptedModel>) -> RetrievalContext {
    RetrievalContext::new(indexed(transit_corpus()).await, embedder(), model)
}
